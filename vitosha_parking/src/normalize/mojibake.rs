/// Characters that show up when Cyrillic bytes are decoded with the wrong codec
pub const MOJIBAKE_MARKERS: &[char] = &['Ð', 'Ñ', 'ð', 'ñ', 'Ž', 'ž', 'Œ', 'œ', '�', '¿', '½'];

/// Only the head of a sample is inspected
pub const SAMPLE_WINDOW: usize = 40;

/// More markers than this in the window means the text is corrupted
pub const MARKER_THRESHOLD: usize = 3;

/// Number of marker characters among the first [`SAMPLE_WINDOW`] characters
pub fn marker_count(text: &str) -> usize {
    text.chars()
        .take(SAMPLE_WINDOW)
        .filter(|c| MOJIBAKE_MARKERS.contains(c))
        .count()
}

/// Heuristic mojibake check. Empty text is clean.
pub fn looks_like_mojibake(text: &str) -> bool {
    marker_count(text) > MARKER_THRESHOLD
}

/// Same check for an optional sample; absent samples are clean.
pub fn sample_is_corrupted(sample: Option<&str>) -> bool {
    sample.is_some_and(looks_like_mojibake)
}
