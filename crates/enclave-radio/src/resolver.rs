//! Channel → playable URL.
//!
//! Direct channels pass their stream URL through untouched.  Folder channels
//! look up their library entry by the folder's last path segment and draw one
//! filename uniformly at random; the generator is injected so callers can
//! seed it.

use enclave_proto::protocol::{Channel, ChannelSource, LibraryIndex};
use rand::seq::SliceRandom;
use rand::RngCore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Track(String),
    /// The folder has no tracks in the library; nothing may be played.
    Empty { folder: String },
}

/// Last non-empty `/`-separated segment of `folder`.
pub fn folder_key(folder: &str) -> Option<&str> {
    folder.split('/').filter(|s| !s.is_empty()).last()
}

/// Percent-encodes a filename the way browsers encode a URI component:
/// `! ' ( ) *` stay literal on top of the unreserved set.
pub fn encode_component(name: &str) -> String {
    const KEPT: [(&str, &str); 5] = [
        ("%21", "!"),
        ("%27", "'"),
        ("%28", "("),
        ("%29", ")"),
        ("%2A", "*"),
    ];
    KEPT.iter()
        .fold(urlencoding::encode(name).into_owned(), |acc, (escaped, literal)| {
            acc.replace(escaped, literal)
        })
}

pub fn resolve(channel: &Channel, library: &LibraryIndex, rng: &mut dyn RngCore) -> Resolution {
    match &channel.source {
        ChannelSource::Direct { src } => Resolution::Track(src.clone()),
        ChannelSource::Folder { folder } => {
            let files = folder_key(folder)
                .map(|key| library.tracks(key))
                .unwrap_or(&[]);
            match files.choose(rng) {
                Some(file) => Resolution::Track(format!("{}/{}", folder, encode_component(file))),
                None => Resolution::Empty {
                    folder: folder.clone(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn library(entries: &[(&str, &[&str])]) -> LibraryIndex {
        entries
            .iter()
            .map(|(k, files)| (k.to_string(), files.iter().map(|f| f.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_folder_key() {
        assert_eq!(folder_key("/audio/chill"), Some("chill"));
        assert_eq!(folder_key("/audio/chill/"), Some("chill"));
        assert_eq!(folder_key("audio//night"), Some("night"));
        assert_eq!(folder_key("/"), None);
        assert_eq!(folder_key(""), None);
    }

    #[test]
    fn test_direct_is_verbatim() {
        let src = "https://example.com/stream?x=a b&y=%20";
        let channel = Channel::direct("d", "Direct", src);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            resolve(&channel, &LibraryIndex::default(), &mut rng),
            Resolution::Track(src.to_string())
        );
    }

    #[test]
    fn test_folder_draws_only_library_members() {
        let channel = Channel::folder("c1", "Chill", "/audio/chill");
        let lib = library(&[("chill", &["one.mp3", "two.mp3"])]);
        let mut rng = StdRng::seed_from_u64(7);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            match resolve(&channel, &lib, &mut rng) {
                Resolution::Track(url) => {
                    assert!(
                        url == "/audio/chill/one.mp3" || url == "/audio/chill/two.mp3",
                        "unexpected url {url}"
                    );
                    seen.insert(url);
                }
                other => panic!("expected a track, got {other:?}"),
            }
        }
        assert_eq!(seen.len(), 2, "both tracks should be reachable");
    }

    #[test]
    fn test_folder_filename_is_encoded() {
        let channel = Channel::folder("c1", "Mixes", "/audio/mixes");
        let lib = library(&[("mixes", &["DJ Mix - Late Night Drive.mp3"])]);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            resolve(&channel, &lib, &mut rng),
            Resolution::Track("/audio/mixes/DJ%20Mix%20-%20Late%20Night%20Drive.mp3".to_string())
        );
    }

    #[test]
    fn test_encode_component_keeps_sub_delims() {
        assert_eq!(encode_component("Track (Remix).mp3"), "Track%20(Remix).mp3");
        assert_eq!(encode_component("Don't Stop!*.mp3"), "Don't%20Stop!*.mp3");
        assert_eq!(encode_component("a&b=c?.mp3"), "a%26b%3Dc%3F.mp3");
        assert_eq!(encode_component("100%.mp3"), "100%25.mp3");
    }

    #[test]
    fn test_folder_absent_or_empty_entry() {
        let mut rng = StdRng::seed_from_u64(0);
        let lib = library(&[("empty", &[])]);

        let absent = Channel::folder("a", "Absent", "/audio/jazz");
        assert_eq!(
            resolve(&absent, &lib, &mut rng),
            Resolution::Empty {
                folder: "/audio/jazz".to_string()
            }
        );

        let empty = Channel::folder("e", "Empty", "/audio/empty");
        assert!(matches!(resolve(&empty, &lib, &mut rng), Resolution::Empty { .. }));

        let rootless = Channel::folder("r", "Root", "/");
        assert!(matches!(resolve(&rootless, &lib, &mut rng), Resolution::Empty { .. }));
    }
}
