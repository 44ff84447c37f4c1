//! Datagram encoding and decoding.
//!
//! Every datagram starts with a little-endian `u32` packet type. Layouts:
//!
//! ```text
//! Hello            [type][version][name:32][rates:4][w][h][fov:8xf32][dtype:1][dsub:1][pad:2][dcaps][ccaps]
//! ConnectionReply  [type][version][width][height][codec][queue size][refresh rate]
//! ChangeSettings   [type][test mode][suspend][queue size]
//! Disconnect       [type]
//! TrackingInfo     [type][flags][timestamp:u64][position:3xf32][orientation:4xf32]
//! VideoFrameStart  [type][counter][pts:u64][frame index:u64][frame size][bytes...]
//! VideoFrame       [type][counter][bytes...]
//! KeepAlive        [type]
//! ```

use crate::core::constants::{
    DEVICE_NAME_SIZE, FOV_COMPONENTS, PROTOCOL_VERSION, REFRESH_RATE_SLOTS,
};
use crate::core::{DeviceDescriptor, PacketError, SettingsChange, StreamSettings, TrackingSample};
use crate::video::VideoFragment;

/// Packet sizes in bytes.
pub mod sizes {
    /// Packet type tag.
    pub const TYPE_SIZE: usize = 4;
    /// Hello packet (fixed).
    pub const HELLO_SIZE: usize = TYPE_SIZE + 4 + 32 + 4 + 4 + 4 + 32 + 1 + 1 + 2 + 4 + 4;
    /// Connection reply (fixed).
    pub const CONNECTION_REPLY_SIZE: usize = TYPE_SIZE + 4 * 6;
    /// Change settings (fixed).
    pub const CHANGE_SETTINGS_SIZE: usize = TYPE_SIZE + 4 * 3;
    /// Tracking info (fixed).
    pub const TRACKING_INFO_SIZE: usize = TYPE_SIZE + 4 + 8 + 4 * 3 + 4 * 4;
    /// Video frame start header, followed by fragment bytes.
    pub const VIDEO_FRAME_START_HEADER_SIZE: usize = TYPE_SIZE + 4 + 8 + 8 + 4;
    /// Video frame continuation header, followed by fragment bytes.
    pub const VIDEO_FRAME_HEADER_SIZE: usize = TYPE_SIZE + 4;
}

/// Packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    /// Client identification (discovery / recovery).
    Hello = 1,
    /// Server handshake reply with negotiated stream parameters.
    ConnectionReply = 2,
    /// In-session settings update.
    ChangeSettings = 3,
    /// Server-initiated session end.
    Disconnect = 4,
    /// Client head pose.
    TrackingInfo = 5,
    /// First fragment of a video frame.
    VideoFrameStart = 6,
    /// Continuation fragment of a video frame.
    VideoFrame = 7,
    /// Server liveness signal.
    KeepAlive = 8,
}

impl PacketType {
    /// Parse a packet type tag.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Hello),
            2 => Some(Self::ConnectionReply),
            3 => Some(Self::ChangeSettings),
            4 => Some(Self::Disconnect),
            5 => Some(Self::TrackingInfo),
            6 => Some(Self::VideoFrameStart),
            7 => Some(Self::VideoFrame),
            8 => Some(Self::KeepAlive),
            _ => None,
        }
    }

    /// Wire value of the tag.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Client identification datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    /// Protocol version spoken by the client.
    pub version: u32,
    /// Advertised device capabilities.
    pub device: DeviceDescriptor,
}

impl HelloMessage {
    /// Hello for the current protocol version.
    pub fn new(device: DeviceDescriptor) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            device,
        }
    }
}

/// Client tracking datagram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingInfo {
    /// Tracking flags (controller state bits).
    pub flags: u32,
    /// Head pose.
    pub sample: TrackingSample,
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet<'a> {
    /// Client identification.
    Hello(HelloMessage),
    /// Server handshake reply.
    ConnectionReply(StreamSettings),
    /// Settings update.
    ChangeSettings(SettingsChange),
    /// Server-initiated disconnect.
    Disconnect,
    /// Client head pose.
    Tracking(TrackingInfo),
    /// Video fragment (start or continuation).
    Video(VideoFragment<'a>),
    /// Liveness signal.
    KeepAlive,
}

impl<'a> Packet<'a> {
    /// Type tag of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Hello(_) => PacketType::Hello,
            Packet::ConnectionReply(_) => PacketType::ConnectionReply,
            Packet::ChangeSettings(_) => PacketType::ChangeSettings,
            Packet::Disconnect => PacketType::Disconnect,
            Packet::Tracking(_) => PacketType::TrackingInfo,
            Packet::Video(VideoFragment::Start { .. }) => PacketType::VideoFrameStart,
            Packet::Video(VideoFragment::Continuation { .. }) => PacketType::VideoFrame,
            Packet::KeepAlive => PacketType::KeepAlive,
        }
    }

    /// Decode a datagram. Video fragments borrow from `buf`.
    pub fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let mut r = Reader::new(buf);
        let raw_type = r.u32()?;
        let packet_type = PacketType::from_u32(raw_type).ok_or(PacketError::UnknownType(raw_type))?;

        match packet_type {
            PacketType::Hello => {
                r.require(sizes::HELLO_SIZE)?;
                let version = r.u32()?;
                check_version(version)?;
                let name = r.bytes(DEVICE_NAME_SIZE)?;
                let name_len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
                let device_name = String::from_utf8_lossy(&name[..name_len]).into_owned();
                let mut refresh_rates = [0u8; REFRESH_RATE_SLOTS];
                refresh_rates.copy_from_slice(r.bytes(REFRESH_RATE_SLOTS)?);
                let render_width = r.u32()?;
                let render_height = r.u32()?;
                let mut fov = [0f32; FOV_COMPONENTS];
                for component in &mut fov {
                    *component = r.f32()?;
                }
                let device_type = r.u8()?;
                let device_sub_type = r.u8()?;
                r.bytes(2)?;
                let device_capability_flags = r.u32()?;
                let controller_capability_flags = r.u32()?;
                Ok(Packet::Hello(HelloMessage {
                    version,
                    device: DeviceDescriptor {
                        device_name,
                        refresh_rates,
                        render_width,
                        render_height,
                        fov,
                        device_type,
                        device_sub_type,
                        device_capability_flags,
                        controller_capability_flags,
                    },
                }))
            }
            PacketType::ConnectionReply => {
                r.require(sizes::CONNECTION_REPLY_SIZE)?;
                check_version(r.u32()?)?;
                let settings = StreamSettings {
                    width: r.u32()?,
                    height: r.u32()?,
                    codec: r.u32()?,
                    frame_queue_size: r.u32()?,
                    refresh_rate: r.u32()?,
                };
                if settings.width == 0 || settings.height == 0 {
                    return Err(PacketError::InvalidField {
                        field: "resolution",
                        value: u64::from(settings.width.min(settings.height)),
                    });
                }
                Ok(Packet::ConnectionReply(settings))
            }
            PacketType::ChangeSettings => {
                r.require(sizes::CHANGE_SETTINGS_SIZE)?;
                Ok(Packet::ChangeSettings(SettingsChange {
                    test_mode: r.u32()?,
                    suspend: r.u32()?,
                    frame_queue_size: r.u32()?,
                }))
            }
            PacketType::Disconnect => Ok(Packet::Disconnect),
            PacketType::KeepAlive => Ok(Packet::KeepAlive),
            PacketType::TrackingInfo => {
                r.require(sizes::TRACKING_INFO_SIZE)?;
                let flags = r.u32()?;
                let timestamp_us = r.u64()?;
                let mut position = [0f32; 3];
                for component in &mut position {
                    *component = r.f32()?;
                }
                let mut orientation = [0f32; 4];
                for component in &mut orientation {
                    *component = r.f32()?;
                }
                Ok(Packet::Tracking(TrackingInfo {
                    flags,
                    sample: TrackingSample::new(position, orientation, timestamp_us),
                }))
            }
            PacketType::VideoFrameStart => {
                r.require(sizes::VIDEO_FRAME_START_HEADER_SIZE)?;
                Ok(Packet::Video(VideoFragment::Start {
                    packet_counter: r.u32()?,
                    presentation_time: r.u64()?,
                    frame_index: r.u64()?,
                    frame_byte_size: r.u32()?,
                    data: r.rest(),
                }))
            }
            PacketType::VideoFrame => {
                r.require(sizes::VIDEO_FRAME_HEADER_SIZE)?;
                Ok(Packet::Video(VideoFragment::Continuation {
                    packet_counter: r.u32()?,
                    data: r.rest(),
                }))
            }
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.packet_type().as_u32().to_le_bytes());

        match self {
            Packet::Hello(hello) => {
                let device = &hello.device;
                buf.extend_from_slice(&hello.version.to_le_bytes());
                let mut name = [0u8; DEVICE_NAME_SIZE];
                let raw = device.device_name.as_bytes();
                // Keep a terminating NUL.
                let len = raw.len().min(DEVICE_NAME_SIZE - 1);
                name[..len].copy_from_slice(&raw[..len]);
                buf.extend_from_slice(&name);
                buf.extend_from_slice(&device.refresh_rates);
                buf.extend_from_slice(&device.render_width.to_le_bytes());
                buf.extend_from_slice(&device.render_height.to_le_bytes());
                for component in device.fov {
                    buf.extend_from_slice(&component.to_le_bytes());
                }
                buf.push(device.device_type);
                buf.push(device.device_sub_type);
                buf.extend_from_slice(&[0, 0]);
                buf.extend_from_slice(&device.device_capability_flags.to_le_bytes());
                buf.extend_from_slice(&device.controller_capability_flags.to_le_bytes());
            }
            Packet::ConnectionReply(settings) => {
                for value in [
                    PROTOCOL_VERSION,
                    settings.width,
                    settings.height,
                    settings.codec,
                    settings.frame_queue_size,
                    settings.refresh_rate,
                ] {
                    buf.extend_from_slice(&value.to_le_bytes());
                }
            }
            Packet::ChangeSettings(change) => {
                for value in [change.test_mode, change.suspend, change.frame_queue_size] {
                    buf.extend_from_slice(&value.to_le_bytes());
                }
            }
            Packet::Disconnect | Packet::KeepAlive => {}
            Packet::Tracking(info) => {
                buf.extend_from_slice(&info.flags.to_le_bytes());
                buf.extend_from_slice(&info.sample.timestamp_us.to_le_bytes());
                for component in info.sample.position.iter().chain(&info.sample.orientation) {
                    buf.extend_from_slice(&component.to_le_bytes());
                }
            }
            Packet::Video(VideoFragment::Start {
                packet_counter,
                presentation_time,
                frame_index,
                frame_byte_size,
                data,
            }) => {
                buf.extend_from_slice(&packet_counter.to_le_bytes());
                buf.extend_from_slice(&presentation_time.to_le_bytes());
                buf.extend_from_slice(&frame_index.to_le_bytes());
                buf.extend_from_slice(&frame_byte_size.to_le_bytes());
                buf.extend_from_slice(data);
            }
            Packet::Video(VideoFragment::Continuation {
                packet_counter,
                data,
            }) => {
                buf.extend_from_slice(&packet_counter.to_le_bytes());
                buf.extend_from_slice(data);
            }
        }
        buf
    }

    fn encoded_len(&self) -> usize {
        match self {
            Packet::Hello(_) => sizes::HELLO_SIZE,
            Packet::ConnectionReply(_) => sizes::CONNECTION_REPLY_SIZE,
            Packet::ChangeSettings(_) => sizes::CHANGE_SETTINGS_SIZE,
            Packet::Disconnect | Packet::KeepAlive => sizes::TYPE_SIZE,
            Packet::Tracking(_) => sizes::TRACKING_INFO_SIZE,
            Packet::Video(VideoFragment::Start { data, .. }) => {
                sizes::VIDEO_FRAME_START_HEADER_SIZE + data.len()
            }
            Packet::Video(VideoFragment::Continuation { data, .. }) => {
                sizes::VIDEO_FRAME_HEADER_SIZE + data.len()
            }
        }
    }
}

fn check_version(version: u32) -> Result<(), PacketError> {
    if version != PROTOCOL_VERSION {
        return Err(PacketError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Little-endian cursor over a datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Fail early if the whole datagram is shorter than `size`.
    fn require(&self, size: usize) -> Result<(), PacketError> {
        if self.buf.len() < size {
            return Err(PacketError::TooShort {
                expected: size,
                actual: self.buf.len(),
            });
        }
        Ok(())
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        self.require(self.pos + len)?;
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, PacketError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, PacketError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn f32(&mut self) -> Result<f32, PacketError> {
        Ok(f32::from_bits(self.u32()?))
    }
}
