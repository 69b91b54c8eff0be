//! Project names and archive filenames.

/// Archive extensions recognized as installable distributions, longest first so that
/// `.tar.gz` wins over a hypothetical `.gz`.
const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".tar.bz2", ".tar.gz", ".tar.xz", ".tgz", ".zip", ".whl", ".egg",
];

/// Normalize a project name the way the simple repository API expects: lowercase, with every
/// run of `-`, `_` and `.` collapsed into a single `-`.
pub fn normalize(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for char in name.chars() {
        if matches!(char, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.push(char.to_ascii_lowercase());
            in_separator = false;
        }
    }
    normalized
}

/// Returns `true` if the name is already in normalized form.
pub fn is_normalized(name: &str) -> bool {
    normalize(name) == name
}

/// Returns `true` if the filename carries one of the known archive extensions.
pub fn is_archive(filename: &str) -> bool {
    split_extension(filename).is_some()
}

fn split_extension(filename: &str) -> Option<(&str, &str)> {
    let lowercase = filename.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS.iter().find_map(|extension| {
        lowercase
            .ends_with(extension)
            .then(|| filename.split_at(filename.len() - extension.len()))
    })
}

/// Guess the normalized project name of an archive from its filename.
///
/// Wheels and eggs carry the name up to the first `-`. Source distributions are split at the
/// first `-` that is followed by a digit, so `foo-bar-1.0.tar.gz` belongs to `foo-bar`.
pub fn project_for_filename(filename: &str) -> Option<String> {
    let (stem, extension) = split_extension(filename)?;

    let name = if extension.eq_ignore_ascii_case(".whl") || extension.eq_ignore_ascii_case(".egg")
    {
        stem.split('-').next()?
    } else {
        let index = stem
            .char_indices()
            .zip(stem.chars().skip(1))
            .find(|((_, char), next)| *char == '-' && next.is_ascii_digit())
            .map(|((start, _), _)| start)?;
        &stem[..index]
    };

    if name.is_empty() {
        return None;
    }
    Some(normalize(name))
}
