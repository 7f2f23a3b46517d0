//! Ordered channel list plus the current selection.

use enclave_proto::protocol::Channel;

#[derive(Debug, Clone, Default)]
pub struct ChannelCatalog {
    channels: Vec<Channel>,
    selected: Option<usize>,
}

impl ChannelCatalog {
    pub fn new(channels: Vec<Channel>) -> Self {
        let mut catalog = Self::default();
        catalog.load(channels);
        catalog
    }

    /// Replace every channel and select the first one.
    pub fn load(&mut self, channels: Vec<Channel>) {
        self.selected = if channels.is_empty() { None } else { Some(0) };
        self.channels = channels;
    }

    /// Select `id` if it names a known channel.  Unknown ids leave the
    /// selection alone; the return value tells the caller which happened.
    pub fn select(&mut self, id: &str) -> bool {
        match self.channels.iter().position(|c| c.id == id) {
            Some(idx) => {
                self.selected = Some(idx);
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<&Channel> {
        self.selected.and_then(|idx| self.channels.get(idx))
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
