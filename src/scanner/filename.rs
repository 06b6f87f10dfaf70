/// Separator between the artist list and the title in a track file stem.
pub const TITLE_SEPARATOR: &str = " - ";

/// Separator between multiple artists.
pub const ARTIST_SEPARATOR: &str = ", ";

/// Artist/title split of a track name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackName {
    pub artists: Vec<String>,
    pub title: String,
}

/// Parse a track file stem of the form `Artist1, Artist2 - Title`.
///
/// Splits on the first `" - "` only, so titles may themselves contain the
/// separator. Without a separator the whole stem is taken as the artist list
/// and the title is empty.
pub fn parse_track_name(name: &str) -> TrackName {
    let (head, title) = match name.split_once(TITLE_SEPARATOR) {
        Some((head, title)) => (head, title),
        None => (name, ""),
    };

    TrackName {
        artists: head.split(ARTIST_SEPARATOR).map(str::to_string).collect(),
        title: title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_artist() {
        let r = parse_track_name("C - Song2");
        assert_eq!(r.artists, vec!["C"]);
        assert_eq!(r.title, "Song2");
    }

    #[test]
    fn test_multiple_artists() {
        let r = parse_track_name("A, B - Song1");
        assert_eq!(r.artists, vec!["A", "B"]);
        assert_eq!(r.title, "Song1");
    }

    #[test]
    fn test_title_containing_separator() {
        let r = parse_track_name("Daft Punk - One More Time - Radio Edit");
        assert_eq!(r.artists, vec!["Daft Punk"]);
        assert_eq!(r.title, "One More Time - Radio Edit");
    }

    #[test]
    fn test_no_separator() {
        let r = parse_track_name("untitled");
        assert_eq!(r.artists, vec!["untitled"]);
        assert_eq!(r.title, "");
    }

    #[test]
    fn test_hyphen_without_spaces_is_not_a_separator() {
        let r = parse_track_name("Jay-Z - Izzo");
        assert_eq!(r.artists, vec!["Jay-Z"]);
        assert_eq!(r.title, "Izzo");
    }
}
