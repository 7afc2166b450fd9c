//! Rule-table classification of archive paths and filenames.
//!
//! Every table is an ordered slice evaluated first-match-wins. New archive
//! sections, consoles or region spellings are added by appending rows.

use serde::Serialize;

use crate::catalog::{Cadence, CollectionSpec, ContentType};
use crate::patterns::PAREN_GROUP_REGEX;

/// Collection used when no section rule matches.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// A top-level archive section.
#[derive(Debug, Clone, Copy)]
pub struct SectionRule {
    /// Archive-relative path prefix, matched case-insensitively on segment boundaries.
    pub prefix: &'static str,
    pub collection: &'static str,
    pub content_type: ContentType,
    pub cadence: Cadence,
}

const fn section(
    prefix: &'static str,
    collection: &'static str,
    content_type: ContentType,
    cadence: Cadence,
) -> SectionRule {
    SectionRule {
        prefix,
        collection,
        content_type,
        cadence,
    }
}

/// Known top-level sections. More specific prefixes come first.
pub const SECTION_RULES: &[SectionRule] = &[
    section("No-Intro", "No-Intro", ContentType::Cartridge, Cadence::Daily),
    section("Redump", "Redump", ContentType::OpticalDisc, Cadence::Daily),
    section("TOSEC-ISO", "TOSEC-ISO", ContentType::OpticalDisc, Cadence::Irregular),
    section("TOSEC-PIX", "TOSEC-PIX", ContentType::Documentation, Cadence::Irregular),
    section("TOSEC", "TOSEC", ContentType::Computer, Cadence::Irregular),
    section("MAME", "MAME", ContentType::Arcade, Cadence::Monthly),
    section("HBMAME", "HBMAME", ContentType::Arcade, Cadence::Irregular),
    section("FinalBurn Neo", "FinalBurn Neo", ContentType::Arcade, Cadence::Irregular),
    section("TeknoParrot", "TeknoParrot", ContentType::Arcade, Cadence::Irregular),
    section("Internet Archive", "Internet Archive", ContentType::Mixed, Cadence::Irregular),
    section("Miscellaneous", "Miscellaneous", ContentType::Mixed, Cadence::Irregular),
    section("RetroAchievements", "RetroAchievements", ContentType::Mixed, Cadence::Weekly),
    section("Lost Level", "Lost Level", ContentType::Cartridge, Cadence::Irregular),
    section("T-En Collection", "T-En Collection", ContentType::Cartridge, Cadence::Irregular),
    section(
        "Hardware Target Game Database",
        "Hardware Target Game Database",
        ContentType::Cartridge,
        Cadence::Irregular,
    ),
    section("Total DOS Collection", "Total DOS Collection", ContentType::Computer, Cadence::Static),
    section("eXo", "eXo", ContentType::Computer, Cadence::Irregular),
    section("0MHz", "0MHz", ContentType::Computer, Cadence::Static),
    section(
        "Touhou Project Collection",
        "Touhou Project Collection",
        ContentType::Computer,
        Cadence::Static,
    ),
    section("bitsavers", "bitsavers", ContentType::Documentation, Cadence::Irregular),
    section("Manuals", "Manuals", ContentType::Documentation, Cadence::Irregular),
    section("Non-Redump", "Non-Redump", ContentType::OpticalDisc, Cadence::Irregular),
];

/// Directory-name prefixes (lower case) mapped to console display names.
/// More specific names come first ("game boy advance" before "game boy").
pub const CONSOLE_RULES: &[(&str, &str)] = &[
    ("nintendo - game boy advance", "Game Boy Advance"),
    ("nintendo - game boy color", "Game Boy Color"),
    ("nintendo - game boy", "Game Boy"),
    ("nintendo - nintendo 64", "Nintendo 64"),
    ("nintendo - nintendo 3ds", "Nintendo 3DS"),
    ("nintendo - nintendo ds", "Nintendo DS"),
    ("nintendo - super nintendo entertainment system", "Super Nintendo"),
    ("nintendo - nintendo entertainment system", "NES"),
    ("nintendo - family computer disk system", "Famicom Disk System"),
    ("nintendo - gamecube", "GameCube"),
    ("nintendo - wii u", "Wii U"),
    ("nintendo - wii", "Wii"),
    ("nintendo - virtual boy", "Virtual Boy"),
    ("sony - playstation portable", "PlayStation Portable"),
    ("sony - playstation vita", "PlayStation Vita"),
    ("sony - playstation 3", "PlayStation 3"),
    ("sony - playstation 2", "PlayStation 2"),
    ("sony - playstation", "PlayStation"),
    ("sega - mega drive - genesis", "Genesis/Mega Drive"),
    ("sega - mega-cd - sega cd", "Sega CD"),
    ("sega - 32x", "32X"),
    ("sega - master system - mark iii", "Master System"),
    ("sega - game gear", "Game Gear"),
    ("sega - saturn", "Saturn"),
    ("sega - dreamcast", "Dreamcast"),
    ("atari - 2600", "Atari 2600"),
    ("atari - 7800", "Atari 7800"),
    ("atari - lynx", "Lynx"),
    ("atari - jaguar", "Jaguar"),
    ("nec - pc engine - turbografx-16", "TurboGrafx-16"),
    ("nec - pc engine cd - turbografx-cd", "TurboGrafx-CD"),
    ("snk - neo geo pocket color", "Neo Geo Pocket Color"),
    ("snk - neo geo pocket", "Neo Geo Pocket"),
    ("bandai - wonderswan color", "WonderSwan Color"),
    ("bandai - wonderswan", "WonderSwan"),
    ("microsoft - xbox 360", "Xbox 360"),
    ("microsoft - xbox", "Xbox"),
    ("commodore - amiga", "Amiga"),
    ("commodore - commodore 64", "Commodore 64"),
];

/// Short names accepted wherever a console filter is given.
pub const CONSOLE_ALIASES: &[(&str, &str)] = &[
    ("gb", "Game Boy"),
    ("gbc", "Game Boy Color"),
    ("gba", "Game Boy Advance"),
    ("nes", "NES"),
    ("famicom", "NES"),
    ("snes", "Super Nintendo"),
    ("sfc", "Super Nintendo"),
    ("n64", "Nintendo 64"),
    ("nds", "Nintendo DS"),
    ("ds", "Nintendo DS"),
    ("3ds", "Nintendo 3DS"),
    ("gc", "GameCube"),
    ("ngc", "GameCube"),
    ("gcn", "GameCube"),
    ("wiiu", "Wii U"),
    ("ps1", "PlayStation"),
    ("psx", "PlayStation"),
    ("ps2", "PlayStation 2"),
    ("ps3", "PlayStation 3"),
    ("psp", "PlayStation Portable"),
    ("vita", "PlayStation Vita"),
    ("genesis", "Genesis/Mega Drive"),
    ("megadrive", "Genesis/Mega Drive"),
    ("md", "Genesis/Mega Drive"),
    ("segacd", "Sega CD"),
    ("sms", "Master System"),
    ("gg", "Game Gear"),
    ("dc", "Dreamcast"),
    ("2600", "Atari 2600"),
    ("tg16", "TurboGrafx-16"),
    ("pce", "TurboGrafx-16"),
];

/// Region tokens as they appear inside parenthetical filename tags.
const REGION_TOKENS: &[&str] = &[
    "World", "USA", "Europe", "Japan", "Asia", "Australia", "Brazil", "Canada", "China",
    "France", "Germany", "Hong Kong", "Italy", "Korea", "Latin America", "Netherlands", "Russia",
    "Scandinavia", "Spain", "Sweden", "Taiwan", "UK", "Unknown",
    // two-letter country codes used by TOSEC-style names
    "US", "EU", "JP", "GB", "DE", "FR", "IT", "ES", "AU", "BR", "CA", "KR", "CN", "TW", "NL",
    "SE", "RU",
];

/// Container formats of the archive itself that need external tooling to use.
const CONVERSION_FORMATS: &[&str] = &[
    "rvz", "wbfs", "wia", "wux", "gcz", "chd", "cso", "zso", "nsz", "xcz",
];

/// Everything inferred about one listed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub collection: CollectionSpec,
    pub console: Option<String>,
    pub region: Option<String>,
    pub format: String,
    pub requires_conversion: bool,
}

/// Classifies a file listed in `relative_dir` (archive-relative, `/`-separated).
#[must_use]
pub fn classify(relative_dir: &str, filename: &str) -> Classification {
    let format = file_format(filename);
    Classification {
        collection: collection_for(relative_dir),
        console: console_for(relative_dir),
        region: region_for(filename),
        requires_conversion: requires_conversion(filename, &format),
        format,
    }
}

/// Maps an archive-relative path onto its collection.
#[must_use]
pub fn collection_for(relative_path: &str) -> CollectionSpec {
    let path = relative_path.trim_start_matches('/');
    SECTION_RULES
        .iter()
        .find(|rule| has_segment_prefix(path, rule.prefix))
        .map_or_else(
            || CollectionSpec {
                name: UNCATEGORIZED.to_string(),
                content_type: ContentType::Mixed,
                cadence: Cadence::Irregular,
            },
            |rule| CollectionSpec {
                name: rule.collection.to_string(),
                content_type: rule.content_type,
                cadence: rule.cadence,
            },
        )
}

fn has_segment_prefix(path: &str, prefix: &str) -> bool {
    path.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        && matches!(path.as_bytes().get(prefix.len()), None | Some(b'/'))
}

/// Infers the console from the deepest directory naming a known system.
///
/// Falls back to the deepest `Maker - System` style directory below the
/// section root, with bracketed tags removed.
#[must_use]
pub fn console_for(relative_dir: &str) -> Option<String> {
    let segments: Vec<&str> = relative_dir
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    for segment in segments.iter().rev() {
        let lower = segment.to_lowercase();
        if let Some((_, console)) = CONSOLE_RULES
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
        {
            return Some((*console).to_string());
        }
    }

    segments
        .iter()
        .skip(1)
        .rev()
        .find(|segment| segment.contains(" - "))
        .map(|segment| {
            let cut = segment.find(" (").unwrap_or(segment.len());
            segment[..cut].trim().to_string()
        })
}

/// Resolves an alias or a case-insensitive display name to the stored console name.
#[must_use]
pub fn canonical_console(name: &str) -> Option<&'static str> {
    let wanted = name.trim();
    CONSOLE_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(wanted))
        .map(|(_, console)| *console)
        .or_else(|| {
            CONSOLE_RULES
                .iter()
                .map(|(_, console)| *console)
                .find(|console| console.eq_ignore_ascii_case(wanted))
        })
}

/// Returns the first parenthetical tag naming a region, e.g. `USA, Europe`.
#[must_use]
pub fn region_for(filename: &str) -> Option<String> {
    PAREN_GROUP_REGEX
        .captures_iter(filename)
        .filter_map(|captures| captures.get(1))
        .map(|group| group.as_str().trim())
        .find(|group| {
            group
                .split(',')
                .map(str::trim)
                .any(|token| REGION_TOKENS.contains(&token))
        })
        .map(str::to_string)
}

/// Lower-case extension after the last dot; empty when there is none.
#[must_use]
pub fn file_format(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .filter(|(stem, ext)| {
            !stem.is_empty()
                && (1..=8).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// True for the archive's own compressed disc-image containers.
#[must_use]
pub fn requires_conversion(filename: &str, format: &str) -> bool {
    CONVERSION_FORMATS.contains(&format) || filename.to_ascii_lowercase().contains(".nkit.")
}
