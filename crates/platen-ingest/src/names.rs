// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File-name cleanup for spooled documents.
//
// Print servers deliver files carrying spooler job suffixes, producer
// application tails, doubled extensions, and mojibake from mis-decoded
// UTF-8. `clean_file_name` reduces all of that to the name a person would
// recognise, and applying it twice changes nothing.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use platen_core::types::JobId;

static RE_JOB_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-job_\d+\.pdf$").unwrap());

static RE_INTERMEDIATE_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(docx?|xlsx?|pptx?|odt|ods|rtf|txt)\.pdf$").unwrap());

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Application names that print systems append to document titles.
/// Longer variants come first so "microsoft word" wins over "word".
const PRODUCER_APPS: &[&str] = &[
    "adobe acrobat reader dc",
    "adobe acrobat reader",
    "adobe acrobat pro",
    "adobe acrobat",
    "adobe reader",
    "microsoft word",
    "microsoft excel",
    "microsoft powerpoint",
    "microsoft edge",
    "mozilla firefox",
    "google chrome",
    "libreoffice writer",
    "libreoffice calc",
    "libreoffice impress",
    "libreoffice",
    "openoffice writer",
    "openoffice",
    "notepad++",
    "notepad",
    "wordpad",
    "chromium",
    "firefox",
    "chrome",
    "safari",
    "opera",
    "preview",
    "word",
    "excel",
    "powerpoint",
];

/// UTF-8 byte sequences mis-decoded as Latin-1, mapped back to the intended
/// character. Three-byte punctuation sequences come before the two-byte
/// accent fixes so they are never split apart.
const MOJIBAKE: &[(&str, &str)] = &[
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€“", "–"),
    ("â€”", "—"),
    ("Ã„", "Ä"),
    ("Ã–", "Ö"),
    ("Ãœ", "Ü"),
    ("Ã¤", "ä"),
    ("Ã¶", "ö"),
    ("Ã¼", "ü"),
    ("ÃŸ", "ß"),
    ("Ã‰", "É"),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã«", "ë"),
    ("Ã¡", "á"),
    ("Ã\u{a0}", "à"),
    ("Ã¢", "â"),
    ("Ã£", "ã"),
    ("Ã…", "Å"),
    ("Ã¥", "å"),
    ("Ã­", "í"),
    ("Ã¬", "ì"),
    ("Ã®", "î"),
    ("Ã¯", "ï"),
    ("Ã³", "ó"),
    ("Ã²", "ò"),
    ("Ã´", "ô"),
    ("Ãµ", "õ"),
    ("Ã˜", "Ø"),
    ("Ã¸", "ø"),
    ("Ãº", "ú"),
    ("Ã¹", "ù"),
    ("Ã»", "û"),
    ("Ã±", "ñ"),
    ("Ã§", "ç"),
    ("Ã†", "Æ"),
    ("Ã¦", "æ"),
];

/// Reduce a spooled file name to its human-readable form.
///
/// Rules run in a fixed order: spooler job suffix, producer application
/// suffix, one trailing free-text segment (only when one of the first two
/// fired), mojibake repair, underscores to spaces, intermediate extension
/// collapse, whitespace collapse, doubled `.pdf` collapse. The sequence is
/// re-applied until nothing changes, so stripping one layer can expose the
/// next and the result is a fixed point: `clean_file_name` of its own output
/// is a no-op.
pub fn clean_file_name(raw: &str) -> String {
    let mut name = raw.trim().to_string();
    // Every pass that changes the name either shortens it or replaces its
    // last underscores, and no rule introduces an underscore, so this
    // terminates.
    loop {
        let before = name.clone();
        name = clean_once(&name);
        if name == before {
            return name;
        }
    }
}

fn clean_once(name: &str) -> String {
    let mut name = name.to_string();

    let mut spooled = false;
    while RE_JOB_SUFFIX.is_match(&name) {
        name = RE_JOB_SUFFIX.replace(&name, ".pdf").into_owned();
        spooled = true;
    }
    while let Some(stripped) = strip_app_suffix(&name) {
        name = stripped;
        spooled = true;
    }
    // A dashed tail is only spooler noise when a spool marker proves the
    // file went through a print system. Without the gate, legitimate
    // "A - B.pdf" names would lose their second half.
    if spooled {
        if let Some(stripped) = strip_trailing_segment(&name) {
            name = stripped;
        }
    }

    for (broken, fixed) in MOJIBAKE {
        if name.contains(broken) {
            name = name.replace(broken, fixed);
        }
    }

    name = name.replace('_', " ");

    while RE_INTERMEDIATE_EXT.is_match(&name) {
        name = RE_INTERMEDIATE_EXT.replace(&name, ".pdf").into_owned();
    }

    name = RE_WHITESPACE.replace_all(name.trim(), " ").into_owned();

    while name.to_ascii_lowercase().ends_with(".pdf.pdf") {
        name.truncate(name.len() - 4);
    }

    name
}

/// Parse a file stem as a job identifier.
///
/// Adopted files are named `<JobId>.pdf`, so a parseable stem marks a file
/// the pipeline has seen before.
pub fn identifier_from_path(path: &Path) -> Option<JobId> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// True when the path carries a `.pdf` extension, matched case-insensitively.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

// ---------------------------------------------------------------------------
// Suffix helpers
// ---------------------------------------------------------------------------

/// Split `name` into stem and a case-insensitive `.pdf` extension.
fn split_pdf_ext(name: &str) -> Option<(&str, &str)> {
    if name.len() < 4 || !name.is_char_boundary(name.len() - 4) {
        return None;
    }
    let (stem, ext) = name.split_at(name.len() - 4);
    ext.eq_ignore_ascii_case(".pdf").then_some((stem, ext))
}

/// Strip a known producer application from the end of the stem, together
/// with the dash or underscore separator in front of it. Matching treats
/// underscores as spaces so "Report_-_Microsoft_Word" is recognised too.
fn strip_app_suffix(name: &str) -> Option<String> {
    let (stem, ext) = split_pdf_ext(name)?;
    let norm = stem.replace('_', " ").to_ascii_lowercase();
    for app in PRODUCER_APPS {
        if !norm.ends_with(app) {
            continue;
        }
        // Both transforms above preserve byte positions, so this index is a
        // valid boundary in the original stem.
        let head = &stem[..stem.len() - app.len()];
        let trimmed = head.trim_end_matches([' ', '_']);
        let Some(pre) = trimmed.strip_suffix(['-', '_']) else {
            continue;
        };
        let cleaned = pre.trim_end_matches([' ', '_']);
        if cleaned.is_empty() {
            continue;
        }
        return Some(format!("{cleaned}{ext}"));
    }
    None
}

/// Strip the last ` - `-separated segment from the stem. Underscores count
/// as spaces when locating the separator.
fn strip_trailing_segment(name: &str) -> Option<String> {
    let (stem, ext) = split_pdf_ext(name)?;
    let norm = stem.replace('_', " ");
    let cut = norm.rfind(" - ")?;
    if cut == 0 {
        return None;
    }
    let head = stem[..cut].trim_end_matches([' ', '_']);
    if head.is_empty() {
        return None;
    }
    Some(format!("{head}{ext}"))
}
