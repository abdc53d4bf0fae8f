//! Monitored input channels.
//!
//! A channel's position in the registry is its wire index, so entries are
//! only ever appended and never removed within a session.

use heapless::Vec;

use crate::timer::DebounceTimer;

/// Maximum number of channels per session. Also the limit of the 7-bit
/// index in event bytes.
pub const MAX_CHANNELS: usize = 128;

/// Raw input identifier as sent by the host (e.g. a pin number).
pub type Pin = u8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel {
    pub pin: Pin,
    /// What the host last heard: true = down.
    pub reported: bool,
    /// Raw state seen by the previous scan.
    pub sampled: bool,
    pub timer: DebounceTimer,
}

impl Channel {
    pub const fn new(pin: Pin) -> Self {
        Self {
            pin,
            reported: false,
            sampled: false,
            timer: DebounceTimer::new(),
        }
    }
}

/// Ordered, bounded channel list.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    channels: Vec<Channel, MAX_CHANNELS>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Append a channel for `pin`. Returns its index, or `None` if the
    /// registry is full.
    pub fn add(&mut self, pin: Pin) -> Option<u8> {
        let index = self.channels.len() as u8;
        self.channels.push(Channel::new(pin)).ok()?;
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Channel> {
        self.channels.iter_mut()
    }

    /// True if no channel before `index` uses the same pin. Hardware setup
    /// and teardown happen once per pin, on its first channel.
    pub fn is_first_use(&self, index: usize) -> bool {
        match self.channels.get(index) {
            Some(channel) => !self.channels[..index].iter().any(|c| c.pin == channel.pin),
            None => false,
        }
    }

    /// Each distinct pin once, in registration order.
    pub fn distinct_pins(&self) -> impl Iterator<Item = Pin> + '_ {
        (0..self.channels.len())
            .filter(move |&i| self.is_first_use(i))
            .map(move |i| self.channels[i].pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assigns_sequential_indices() {
        let mut reg = Registry::new();
        assert_eq!(reg.add(5), Some(0));
        assert_eq!(reg.add(9), Some(1));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(1).map(|c| c.pin), Some(9));
        assert!(!reg.get(0).unwrap().reported);
        assert!(!reg.get(0).unwrap().timer.is_armed());
    }

    #[test]
    fn test_capacity() {
        let mut reg = Registry::new();
        for i in 0..MAX_CHANNELS {
            assert_eq!(reg.add(i as u8), Some(i as u8));
        }
        assert_eq!(reg.add(200), None);
        assert_eq!(reg.len(), MAX_CHANNELS);
    }

    #[test]
    fn test_duplicates_kept_but_first_use_tracked() {
        let mut reg = Registry::new();
        reg.add(3);
        reg.add(4);
        reg.add(3);
        assert_eq!(reg.len(), 3);
        assert!(reg.is_first_use(0));
        assert!(reg.is_first_use(1));
        assert!(!reg.is_first_use(2));
        assert!(!reg.is_first_use(3));

        let pins: std::vec::Vec<Pin> = reg.distinct_pins().collect();
        assert_eq!(pins, [3, 4]);
    }
}
