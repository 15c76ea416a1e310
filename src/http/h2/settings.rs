//! SETTINGS parameters (RFC 9113 Section 6.5)
//!
//! The same type carries both directions: the values this client advertises
//! in its preface, and each SETTINGS frame the server sends. A field left as
//! `None` was not carried, so whatever was in effect before still applies.

use super::error::{Error, Result};
use super::{
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE,
    MAX_WINDOW_SIZE,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Encoded size of one parameter: 16-bit identifier, 32-bit value
const PARAMETER_SIZE: usize = 6;

/// Parameter identifiers this engine understands
///
/// Anything else on the wire is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
}

impl SettingId {
    const ALL: [SettingId; 6] = [
        SettingId::HeaderTableSize,
        SettingId::EnablePush,
        SettingId::MaxConcurrentStreams,
        SettingId::InitialWindowSize,
        SettingId::MaxFrameSize,
        SettingId::MaxHeaderListSize,
    ];

    pub fn from_wire(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.to_wire() == id)
    }

    pub fn to_wire(self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
        }
    }
}

impl fmt::Display for SettingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingId::HeaderTableSize => "SETTINGS_HEADER_TABLE_SIZE",
            SettingId::EnablePush => "SETTINGS_ENABLE_PUSH",
            SettingId::MaxConcurrentStreams => "SETTINGS_MAX_CONCURRENT_STREAMS",
            SettingId::InitialWindowSize => "SETTINGS_INITIAL_WINDOW_SIZE",
            SettingId::MaxFrameSize => "SETTINGS_MAX_FRAME_SIZE",
            SettingId::MaxHeaderListSize => "SETTINGS_MAX_HEADER_LIST_SIZE",
        };
        f.write_str(name)
    }
}

/// A set of SETTINGS values, each possibly absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    /// `None` means no limit has been announced
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    /// Advisory only; `None` means unlimited
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_table_size_or_default(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    /// Push is on until a SETTINGS frame turns it off
    pub fn push_enabled(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    pub fn initial_window_size_or_default(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn max_frame_size_or_default(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Parameters that are present, in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (SettingId, u32)> + '_ {
        SettingId::ALL
            .into_iter()
            .filter_map(move |id| self.value(id).map(|v| (id, v)))
    }

    fn value(&self, id: SettingId) -> Option<u32> {
        match id {
            SettingId::HeaderTableSize => self.header_table_size,
            SettingId::EnablePush => self.enable_push.map(u32::from),
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams,
            SettingId::InitialWindowSize => self.initial_window_size,
            SettingId::MaxFrameSize => self.max_frame_size,
            SettingId::MaxHeaderListSize => self.max_header_list_size,
        }
    }

    /// Store one parameter after range-checking it
    ///
    /// The error variant is the connection error a peer sending this value
    /// has committed.
    pub fn apply(&mut self, id: SettingId, value: u32) -> Result<()> {
        match id {
            SettingId::HeaderTableSize => self.header_table_size = Some(value),
            SettingId::EnablePush => {
                self.enable_push = Some(match value {
                    0 => false,
                    1 => true,
                    _ => return Err(Error::Protocol(format!("{id} must be 0 or 1, got {value}"))),
                });
            }
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingId::InitialWindowSize => {
                if value > MAX_WINDOW_SIZE {
                    return Err(Error::FlowControl(format!("{id} {value} exceeds 2^31-1")));
                }
                self.initial_window_size = Some(value);
            }
            SettingId::MaxFrameSize => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(Error::Protocol(format!("{id} {value} outside 16384-16777215")));
                }
                self.max_frame_size = Some(value);
            }
            SettingId::MaxHeaderListSize => self.max_header_list_size = Some(value),
        }
        Ok(())
    }

    /// Check values this endpoint is about to advertise
    pub fn validate(&self) -> Result<()> {
        let mut scratch = Settings::new();
        for (id, value) in self.iter() {
            scratch
                .apply(id, value)
                .map_err(|e| Error::InvalidSettings(e.to_string()))?;
        }
        Ok(())
    }

    /// Parse the payload of a non-ACK SETTINGS frame
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() % PARAMETER_SIZE != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload of {} bytes is not a whole number of parameters",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        let mut buf = payload;
        while buf.has_remaining() {
            let id = buf.get_u16();
            let value = buf.get_u32();
            if let Some(id) = SettingId::from_wire(id) {
                settings.apply(id, value)?;
            }
        }
        Ok(settings)
    }

    /// Every SETTINGS_HEADER_TABLE_SIZE value in `payload`, in order
    ///
    /// [`Settings::decode`] keeps only the last one, but an HPACK encoder
    /// has to see the smallest as well.
    pub fn header_table_sizes(payload: &[u8]) -> impl Iterator<Item = u32> + '_ {
        let id = SettingId::HeaderTableSize.to_wire();
        payload.chunks_exact(PARAMETER_SIZE).filter_map(move |mut param| {
            (param.get_u16() == id).then(|| param.get_u32())
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SettingId::ALL.len() * PARAMETER_SIZE);
        for (id, value) in self.iter() {
            buf.put_u16(id.to_wire());
            buf.put_u32(value);
        }
        buf.freeze()
    }

    /// Overlay the parameters present in `update`
    pub fn merge(&mut self, update: &Settings) {
        if update.header_table_size.is_some() {
            self.header_table_size = update.header_table_size;
        }
        if update.enable_push.is_some() {
            self.enable_push = update.enable_push;
        }
        if update.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = update.max_concurrent_streams;
        }
        if update.initial_window_size.is_some() {
            self.initial_window_size = update.initial_window_size;
        }
        if update.max_frame_size.is_some() {
            self.max_frame_size = update.max_frame_size;
        }
        if update.max_header_list_size.is_some() {
            self.max_header_list_size = update.max_header_list_size;
        }
    }
}

/// Fluent construction of validated settings
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_ids() {
        assert_eq!(SettingId::from_wire(0x4), Some(SettingId::InitialWindowSize));
        assert_eq!(SettingId::MaxHeaderListSize.to_wire(), 0x6);
        // ENABLE_CONNECT_PROTOCOL and unassigned ids are skipped
        assert_eq!(SettingId::from_wire(0x8), None);
        assert_eq!(SettingId::from_wire(0xffff), None);
        assert_eq!(SettingId::EnablePush.to_string(), "SETTINGS_ENABLE_PUSH");
    }

    #[test]
    fn test_absent_parameters_fall_back() {
        let settings = Settings::new();
        assert_eq!(settings.header_table_size_or_default(), 4096);
        assert!(settings.push_enabled());
        assert_eq!(settings.initial_window_size_or_default(), 65535);
        assert_eq!(settings.max_frame_size_or_default(), 16384);
        assert_eq!(settings.max_concurrent_streams, None);
        assert_eq!(settings.encode().len(), 0);
    }

    #[test]
    fn test_client_preface_settings() {
        let settings = SettingsBuilder::new()
            .header_table_size(0)
            .enable_push(false)
            .max_concurrent_streams(100)
            .initial_window_size(1 << 20)
            .max_header_list_size(65536)
            .build()
            .unwrap();

        let payload = settings.encode();
        assert_eq!(payload.len(), 30);
        assert_eq!(&payload[..6], &[0x0, 0x1, 0, 0, 0, 0]);
        assert_eq!(&payload[6..12], &[0x0, 0x2, 0, 0, 0, 0]);
        assert_eq!(Settings::decode(&payload).unwrap(), settings);
    }

    #[test]
    fn test_server_settings_skip_unknown() {
        // 0xff = 7, MAX_CONCURRENT_STREAMS = 10, ENABLE_CONNECT_PROTOCOL = 1
        let payload = [
            0x0, 0xff, 0, 0, 0, 7, //
            0x0, 0x3, 0, 0, 0, 10, //
            0x0, 0x8, 0, 0, 0, 1,
        ];
        let settings = Settings::decode(&payload).unwrap();
        assert_eq!(settings.max_concurrent_streams, Some(10));
        assert_eq!(settings.iter().count(), 1);
    }

    #[test]
    fn test_bad_server_settings() {
        assert!(matches!(Settings::decode(&[0, 1, 0, 0]), Err(Error::FrameSize(_))));
        assert!(matches!(Settings::decode(&[0, 2, 0, 0, 0, 2]), Err(Error::Protocol(_))));
        assert!(matches!(
            Settings::decode(&[0, 4, 0x80, 0, 0, 0]),
            Err(Error::FlowControl(_))
        ));
        assert!(matches!(Settings::decode(&[0, 5, 0, 0, 0x04, 0]), Err(Error::Protocol(_))));
        assert!(matches!(Settings::decode(&[0, 5, 0x01, 0, 0, 0]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        assert!(SettingsBuilder::new().max_frame_size(16384).build().is_ok());
        assert!(matches!(
            SettingsBuilder::new().initial_window_size(1 << 31).build(),
            Err(Error::InvalidSettings(_))
        ));
        assert!(matches!(
            SettingsBuilder::new().max_frame_size(1 << 24).build(),
            Err(Error::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_later_frame_overrides_earlier() {
        let mut effective = Settings::decode(&[0, 3, 0, 0, 0, 100, 0, 4, 0, 0, 0xff, 0xff]).unwrap();
        let update = Settings::decode(&[0, 3, 0, 0, 0, 1]).unwrap();
        effective.merge(&update);

        assert_eq!(effective.max_concurrent_streams, Some(1));
        assert_eq!(effective.initial_window_size, Some(65535));
    }

    #[test]
    fn test_header_table_sizes_in_order() {
        let payload = [0, 1, 0, 0, 0, 0, 0, 3, 0, 0, 0, 100, 0, 1, 0, 0, 0x10, 0];
        let sizes: Vec<u32> = Settings::header_table_sizes(&payload).collect();
        assert_eq!(sizes, vec![0, 4096]);

        let settings = Settings::decode(&payload).unwrap();
        assert_eq!(settings.header_table_size, Some(4096));
        assert_eq!(Settings::header_table_sizes(&[0, 4, 0, 0, 0xff, 0xff]).count(), 0);
    }
}
