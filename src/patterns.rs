//! Compiled-once HTML selectors and regular expressions.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        #[allow(clippy::expect_used)]
        pub(crate) static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("static selector must parse"));
    };
}

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        #[allow(clippy::expect_used)]
        pub(crate) static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($regex).expect("static regex must compile"));
    };
}

// Directory listings: one row per child, first cell carries the link.
selector!(ROW_SELECTOR, "tr");
selector!(CELL_SELECTOR, "td");
selector!(LINK_SELECTOR, "a[href]");

// Parenthetical groups in a filename, e.g. "(USA, Europe)".
regex!(PAREN_GROUP_REGEX, r"\(([^()]+)\)");

// Human size cells: "1.5 GiB", "700M", "12,345".
regex!(
    SIZE_REGEX,
    r"(?i)^\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*([kmgtp]?)(?:i?b)?\s*$"
);
