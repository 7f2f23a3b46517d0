//! Now-playing title derivation and ticker sizing.

use enclave_proto::config::TickerConfig;
use enclave_proto::protocol::NowPlaying;
use unicode_width::UnicodeWidthStr;

/// Extensions stripped from filenames, matched case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];

/// Pixels of content that scroll past per second.
const TICKER_PX_PER_SEC: u32 = 40;
const TICKER_MIN_SECS: u32 = 8;
const TICKER_MAX_SECS: u32 = 18;

/// Turn a filename into a display title: drop the audio extension and, for
/// `Artist - Title` names, keep what follows the last separator.
pub fn clean_title(filename: &str) -> String {
    let mut name = filename;
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) {
            name = stem;
        }
    }
    if let Some((_, title)) = name.rsplit_once(" - ") {
        name = title;
    }
    name.trim().to_string()
}

/// Title for a resolved track URL (last path segment, percent-decoded).
pub fn title_from_url(url: &str) -> String {
    let segment = url.rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    clean_title(&decoded)
}

/// Scroll duration for content `width_px` wide.
pub fn ticker_duration_secs(width_px: u32) -> u32 {
    width_px
        .div_ceil(TICKER_PX_PER_SEC)
        .clamp(TICKER_MIN_SECS, TICKER_MAX_SECS)
}

/// Measures rendered text against its container.
pub trait TextMeasure: Send + Sync {
    fn text_width(&self, text: &str) -> u32;
    fn container_width(&self) -> u32;
}

/// Fixed-size cells: every terminal column is `cell_px` wide.
#[derive(Debug, Clone)]
pub struct CellMeasure {
    pub cell_px: u32,
    pub container_px: u32,
}

impl From<&TickerConfig> for CellMeasure {
    fn from(cfg: &TickerConfig) -> Self {
        Self {
            cell_px: cfg.cell_px,
            container_px: cfg.container_px,
        }
    }
}

impl TextMeasure for CellMeasure {
    fn text_width(&self, text: &str) -> u32 {
        (text.width() as u32).saturating_mul(self.cell_px)
    }

    fn container_width(&self) -> u32 {
        self.container_px
    }
}

pub struct NowPlayingPresenter {
    measure: Box<dyn TextMeasure>,
}

impl NowPlayingPresenter {
    pub fn new(measure: Box<dyn TextMeasure>) -> Self {
        Self { measure }
    }

    pub fn derive(&self, url: &str) -> NowPlaying {
        let title = title_from_url(url);
        let width = self.measure.text_width(&title);
        let ticker_secs = (width > self.measure.container_width()).then(|| ticker_duration_secs(width));
        NowPlaying { title, ticker_secs }
    }
}

impl Default for NowPlayingPresenter {
    fn default() -> Self {
        Self::new(Box::new(CellMeasure::from(&TickerConfig::default())))
    }
}
