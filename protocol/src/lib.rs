// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Wire format for the accelerator's rpmsg protocol: a 16-byte header followed by a
//! type-specific, fixed-size, little-endian payload. Every struct here is a direct
//! transcription of the C layout the firmware expects; encoding/decoding is hand-written
//! because the payloads are fixed-size structs, not a schema that benefits from a generator.

use std::fmt;

pub mod pipe;

/// Magic value every packet header must carry.
pub const MAGIC: u32 = 0x4145_7631;

/// Expected protocol version this host implementation was built against.
pub const EXPECTED_VERSION_MAJOR: u8 = 0;
pub const EXPECTED_VERSION_MINOR: u8 = 2;

pub const BUFFER_MAX: usize = 16;
pub const FD_MAX: usize = 16;
pub const PMU_EVENT_MAX: usize = 4;
pub const PMU_MAX: usize = 8;

const HEADER_LEN: usize = 16;

/// The possible errors that can arise from decoding or encoding a packet.
#[derive(Debug)]
pub enum Error {
    /// The header's magic value didn't match, or a payload's length didn't match the type.
    BadMessage(String),

    /// A well-formed header carried a type this implementation doesn't know about.
    ProtocolError(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadMessage(s) => write!(f, "bad message: {s}"),
            Self::ProtocolError(s) => write!(f, "protocol error: {s}"),
        }
    }
}

/// `type` field of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Err = 1,
    Ping = 2,
    Pong = 3,
    InferenceReq = 4,
    InferenceRsp = 5,
    VersionReq = 6,
    VersionRsp = 7,
    CapabilitiesReq = 8,
    CapabilitiesRsp = 9,
    NetworkInfoReq = 10,
    NetworkInfoRsp = 11,
    CancelInferenceReq = 12,
    CancelInferenceRsp = 13,
}

impl MessageType {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::Err,
            2 => Self::Ping,
            3 => Self::Pong,
            4 => Self::InferenceReq,
            5 => Self::InferenceRsp,
            6 => Self::VersionReq,
            7 => Self::VersionRsp,
            8 => Self::CapabilitiesReq,
            9 => Self::CapabilitiesRsp,
            10 => Self::NetworkInfoReq,
            11 => Self::NetworkInfoRsp,
            12 => Self::CancelInferenceReq,
            13 => Self::CancelInferenceRsp,
            _ => return None,
        })
    }
}

/// Response/inference status codes as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RpmsgStatus {
    Ok = 0,
    Error = 1,
    Running = 2,
    Rejected = 3,
    Aborted = 4,
    Aborting = 5,
}

impl RpmsgStatus {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Running,
            3 => Self::Rejected,
            4 => Self::Aborted,
            5 => Self::Aborting,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub msg_type: u32,
    pub msg_id: u64,
}

impl Header {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.msg_type.to_le_bytes());
        out.extend_from_slice(&self.msg_id.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::BadMessage("packet shorter than header".into()));
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let msg_type = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let msg_id = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        Ok(Self {
            magic,
            msg_type,
            msg_id,
        })
    }
}

/// `buffer = { u32 device_ptr, u32 size }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRef {
    pub device_ptr: u32,
    pub size: u32,
}

impl BufferRef {
    const LEN: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.device_ptr.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            device_ptr: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// `network_ref = { u32 kind, union { buffer, u32 index } }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRef {
    Buffer(BufferRef),
    Index(u32),
}

impl NetworkRef {
    const LEN: usize = 4 + 8; // kind + union(buffer is the larger arm)

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Buffer(b) => {
                out.extend_from_slice(&1u32.to_le_bytes());
                b.encode(out);
            }
            Self::Index(i) => {
                out.extend_from_slice(&2u32.to_le_bytes());
                out.extend_from_slice(&i.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes()); // pad union to buffer's width
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let kind = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        match kind {
            1 => Ok(Self::Buffer(BufferRef::decode(&buf[4..12]))),
            2 => Ok(Self::Index(u32::from_le_bytes(buf[4..8].try_into().unwrap()))),
            other => Err(Error::BadMessage(format!("bad network_ref kind {other}"))),
        }
    }
}

fn encode_buffer_array(out: &mut Vec<u8>, bufs: &[BufferRef; BUFFER_MAX]) {
    for b in bufs {
        b.encode(out);
    }
}

fn decode_buffer_array(buf: &[u8]) -> [BufferRef; BUFFER_MAX] {
    let mut out = [BufferRef::default(); BUFFER_MAX];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = BufferRef::decode(&buf[i * BufferRef::LEN..(i + 1) * BufferRef::LEN]);
    }
    out
}

fn encode_u32_array(out: &mut Vec<u8>, vals: &[u32; BUFFER_MAX]) {
    for v in vals {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn decode_u32_array(buf: &[u8]) -> [u32; BUFFER_MAX] {
    let mut out = [0u32; BUFFER_MAX];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u32::from_le_bytes(buf[i * 4..(i + 1) * 4].try_into().unwrap());
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub err_type: u32,
    pub msg: [u8; 128],
}

impl ErrorPayload {
    const LEN: usize = 4 + 128;

    /// The error message up to (not including) its first NUL byte.
    pub fn message(&self) -> &str {
        let end = self.msg.iter().position(|&b| b == 0).unwrap_or(self.msg.len());
        std::str::from_utf8(&self.msg[..end]).unwrap_or("<non-utf8 error message>")
    }

    /// Whether the message field is NUL-terminated within its 128 bytes.
    pub fn is_terminated(&self) -> bool {
        self.msg.iter().any(|&b| b == 0)
    }

    fn decode(buf: &[u8]) -> Self {
        let err_type = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut msg = [0u8; 128];
        msg.copy_from_slice(&buf[4..132]);
        Self { err_type, msg }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.err_type.to_le_bytes());
        out.extend_from_slice(&self.msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceReq {
    pub ifm_count: u32,
    pub ifm: [BufferRef; BUFFER_MAX],
    pub ofm_count: u32,
    pub ofm: [BufferRef; BUFFER_MAX],
    pub network: NetworkRef,
    pub pmu_cfg: [u8; PMU_MAX],
    pub cycle_counter_enable: u32,
}

impl InferenceReq {
    const LEN: usize = 4 + BUFFER_MAX * BufferRef::LEN + 4 + BUFFER_MAX * BufferRef::LEN
        + NetworkRef::LEN
        + PMU_MAX
        + 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ifm_count.to_le_bytes());
        encode_buffer_array(out, &self.ifm);
        out.extend_from_slice(&self.ofm_count.to_le_bytes());
        encode_buffer_array(out, &self.ofm);
        self.network.encode(out);
        out.extend_from_slice(&self.pmu_cfg);
        out.extend_from_slice(&self.cycle_counter_enable.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut off = 0;
        let ifm_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let ifm = decode_buffer_array(&buf[off..off + BUFFER_MAX * BufferRef::LEN]);
        off += BUFFER_MAX * BufferRef::LEN;
        let ofm_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let ofm = decode_buffer_array(&buf[off..off + BUFFER_MAX * BufferRef::LEN]);
        off += BUFFER_MAX * BufferRef::LEN;
        let network = NetworkRef::decode(&buf[off..off + NetworkRef::LEN])?;
        off += NetworkRef::LEN;
        let mut pmu_cfg = [0u8; PMU_MAX];
        pmu_cfg.copy_from_slice(&buf[off..off + PMU_MAX]);
        off += PMU_MAX;
        let cycle_counter_enable = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        Ok(Self {
            ifm_count,
            ifm,
            ofm_count,
            ofm,
            network,
            pmu_cfg,
            cycle_counter_enable,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceRsp {
    pub ofm_count: u32,
    pub ofm_size: [u32; BUFFER_MAX],
    pub status: u32,
    pub pmu_cfg: [u8; PMU_MAX],
    pub pmu_count: [u64; PMU_MAX],
    pub cycle_counter_enable: u32,
    pub cycle_counter_count: u64,
}

impl InferenceRsp {
    const LEN: usize =
        4 + BUFFER_MAX * 4 + 4 + PMU_MAX + PMU_MAX * 8 + 4 + 8;

    pub fn status(&self) -> Option<RpmsgStatus> {
        RpmsgStatus::from_u32(self.status)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ofm_count.to_le_bytes());
        encode_u32_array(out, &self.ofm_size);
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.pmu_cfg);
        for c in &self.pmu_count {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&self.cycle_counter_enable.to_le_bytes());
        out.extend_from_slice(&self.cycle_counter_count.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut off = 0;
        let ofm_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let ofm_size = decode_u32_array(&buf[off..off + BUFFER_MAX * 4]);
        off += BUFFER_MAX * 4;
        let status = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mut pmu_cfg = [0u8; PMU_MAX];
        pmu_cfg.copy_from_slice(&buf[off..off + PMU_MAX]);
        off += PMU_MAX;
        let mut pmu_count = [0u64; PMU_MAX];
        for slot in pmu_count.iter_mut() {
            *slot = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
            off += 8;
        }
        let cycle_counter_enable = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let cycle_counter_count = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        Self {
            ofm_count,
            ofm_size,
            status,
            pmu_cfg,
            pmu_count,
            cycle_counter_enable,
            cycle_counter_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRsp {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl VersionRsp {
    const LEN: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.major);
        out.push(self.minor);
        out.push(self.patch);
        out.push(0);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            major: buf[0],
            minor: buf[1],
            patch: buf[2],
        }
    }
}

/// 13 `u32` fields, per §4.5/§6 of the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitiesRsp {
    pub hw_major: u32,
    pub hw_minor: u32,
    pub hw_patch: u32,
    pub driver_major: u32,
    pub driver_minor: u32,
    pub driver_patch: u32,
    pub product_major: u32,
    pub mac_per_cycle: u32,
    pub cmd_stream_version: u32,
    pub custom_dma: u32,
    pub reserved: [u32; 3],
}

impl CapabilitiesRsp {
    const LEN: usize = 13 * 4;

    fn encode(&self, out: &mut Vec<u8>) {
        for v in [
            self.hw_major,
            self.hw_minor,
            self.hw_patch,
            self.driver_major,
            self.driver_minor,
            self.driver_patch,
            self.product_major,
            self.mac_per_cycle,
            self.cmd_stream_version,
            self.custom_dma,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.reserved {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn decode(buf: &[u8]) -> Self {
        let mut vals = [0u32; 13];
        for (i, slot) in vals.iter_mut().enumerate() {
            *slot = u32::from_le_bytes(buf[i * 4..(i + 1) * 4].try_into().unwrap());
        }
        Self {
            hw_major: vals[0],
            hw_minor: vals[1],
            hw_patch: vals[2],
            driver_major: vals[3],
            driver_minor: vals[4],
            driver_patch: vals[5],
            product_major: vals[6],
            mac_per_cycle: vals[7],
            cmd_stream_version: vals[8],
            custom_dma: vals[9],
            reserved: [vals[10], vals[11], vals[12]],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkInfoReq {
    pub network: NetworkRef,
}

impl NetworkInfoReq {
    const LEN: usize = NetworkRef::LEN;

    fn encode(&self, out: &mut Vec<u8>) {
        self.network.encode(out);
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            network: NetworkRef::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkInfoRsp {
    pub desc: [u8; 32],
    pub ifm_count: u32,
    pub ifm_size: [u32; BUFFER_MAX],
    pub ofm_count: u32,
    pub ofm_size: [u32; BUFFER_MAX],
    pub status: u32,
}

impl NetworkInfoRsp {
    const LEN: usize = 32 + 4 + BUFFER_MAX * 4 + 4 + BUFFER_MAX * 4 + 4;

    pub fn status(&self) -> Option<RpmsgStatus> {
        RpmsgStatus::from_u32(self.status)
    }

    /// The description up to its first NUL byte; `None` if unterminated.
    pub fn desc_str(&self) -> Option<&str> {
        let end = self.desc.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&self.desc[..end]).ok()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.desc);
        out.extend_from_slice(&self.ifm_count.to_le_bytes());
        encode_u32_array(out, &self.ifm_size);
        out.extend_from_slice(&self.ofm_count.to_le_bytes());
        encode_u32_array(out, &self.ofm_size);
        out.extend_from_slice(&self.status.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut off = 0;
        let mut desc = [0u8; 32];
        desc.copy_from_slice(&buf[off..off + 32]);
        off += 32;
        let ifm_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let ifm_size = decode_u32_array(&buf[off..off + BUFFER_MAX * 4]);
        off += BUFFER_MAX * 4;
        let ofm_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let ofm_size = decode_u32_array(&buf[off..off + BUFFER_MAX * 4]);
        off += BUFFER_MAX * 4;
        let status = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        Self {
            desc,
            ifm_count,
            ifm_size,
            ofm_count,
            ofm_size,
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelInferenceReq {
    pub inference_handle: u64,
}

impl CancelInferenceReq {
    const LEN: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.inference_handle.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            inference_handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelInferenceRsp {
    pub status: u32,
}

impl CancelInferenceRsp {
    const LEN: usize = 4;

    pub fn status(&self) -> Option<RpmsgStatus> {
        RpmsgStatus::from_u32(self.status)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.status.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            status: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        }
    }
}

/// A fully decoded packet: header plus a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Err(ErrorPayload),
    Ping,
    Pong,
    InferenceReq(InferenceReq),
    InferenceRsp(InferenceRsp),
    VersionReq,
    VersionRsp(VersionRsp),
    CapabilitiesReq,
    CapabilitiesRsp(CapabilitiesRsp),
    NetworkInfoReq(NetworkInfoReq),
    NetworkInfoRsp(NetworkInfoRsp),
    CancelInferenceReq(CancelInferenceReq),
    CancelInferenceRsp(CancelInferenceRsp),
}

impl Message {
    fn msg_type(&self) -> MessageType {
        match self {
            Self::Err(_) => MessageType::Err,
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
            Self::InferenceReq(_) => MessageType::InferenceReq,
            Self::InferenceRsp(_) => MessageType::InferenceRsp,
            Self::VersionReq => MessageType::VersionReq,
            Self::VersionRsp(_) => MessageType::VersionRsp,
            Self::CapabilitiesReq => MessageType::CapabilitiesReq,
            Self::CapabilitiesRsp(_) => MessageType::CapabilitiesRsp,
            Self::NetworkInfoReq(_) => MessageType::NetworkInfoReq,
            Self::NetworkInfoRsp(_) => MessageType::NetworkInfoRsp,
            Self::CancelInferenceReq(_) => MessageType::CancelInferenceReq,
            Self::CancelInferenceRsp(_) => MessageType::CancelInferenceRsp,
        }
    }

    /// Encode this message, including its header, with the given `msg_id` correlation id.
    pub fn encode(&self, msg_id: u64) -> Vec<u8> {
        let header = Header {
            magic: MAGIC,
            msg_type: self.msg_type() as u32,
            msg_id,
        };
        let mut out = Vec::with_capacity(HEADER_LEN + 64);
        header.encode(&mut out);
        match self {
            Self::Err(p) => p.encode(&mut out),
            Self::Ping | Self::Pong | Self::VersionReq | Self::CapabilitiesReq => {}
            Self::InferenceReq(p) => p.encode(&mut out),
            Self::InferenceRsp(p) => p.encode(&mut out),
            Self::VersionRsp(p) => p.encode(&mut out),
            Self::CapabilitiesRsp(p) => p.encode(&mut out),
            Self::NetworkInfoReq(p) => p.encode(&mut out),
            Self::NetworkInfoRsp(p) => p.encode(&mut out),
            Self::CancelInferenceReq(p) => p.encode(&mut out),
            Self::CancelInferenceRsp(p) => p.encode(&mut out),
        }
        out
    }

    /// Decode a complete packet (header + payload). Returns the message and its `msg_id`.
    ///
    /// Rejects a magic mismatch and any payload whose length doesn't exactly match its type;
    /// there is no partial-payload acceptance (§4.7 of the specification).
    pub fn decode(buf: &[u8]) -> Result<(Self, u64), Error> {
        let header = Header::decode(buf)?;
        if header.magic != MAGIC {
            return Err(Error::BadMessage(format!(
                "bad magic {:#x}, expected {:#x}",
                header.magic, MAGIC
            )));
        }
        let payload = &buf[HEADER_LEN..];
        let msg_type = MessageType::from_u32(header.msg_type)
            .ok_or_else(|| Error::ProtocolError(format!("unknown type {}", header.msg_type)))?;

        let expect_len = |want: usize| -> Result<(), Error> {
            if payload.len() != want {
                Err(Error::BadMessage(format!(
                    "{:?} payload is {} bytes, expected {}",
                    msg_type,
                    payload.len(),
                    want
                )))
            } else {
                Ok(())
            }
        };

        let message = match msg_type {
            MessageType::Err => {
                expect_len(ErrorPayload::LEN)?;
                Self::Err(ErrorPayload::decode(payload))
            }
            MessageType::Ping => {
                expect_len(0)?;
                Self::Ping
            }
            MessageType::Pong => {
                expect_len(0)?;
                Self::Pong
            }
            MessageType::InferenceReq => {
                expect_len(InferenceReq::LEN)?;
                Self::InferenceReq(InferenceReq::decode(payload)?)
            }
            MessageType::InferenceRsp => {
                expect_len(InferenceRsp::LEN)?;
                Self::InferenceRsp(InferenceRsp::decode(payload))
            }
            MessageType::VersionReq => {
                expect_len(0)?;
                Self::VersionReq
            }
            MessageType::VersionRsp => {
                expect_len(VersionRsp::LEN)?;
                Self::VersionRsp(VersionRsp::decode(payload))
            }
            MessageType::CapabilitiesReq => {
                expect_len(0)?;
                Self::CapabilitiesReq
            }
            MessageType::CapabilitiesRsp => {
                expect_len(CapabilitiesRsp::LEN)?;
                Self::CapabilitiesRsp(CapabilitiesRsp::decode(payload))
            }
            MessageType::NetworkInfoReq => {
                expect_len(NetworkInfoReq::LEN)?;
                Self::NetworkInfoReq(NetworkInfoReq::decode(payload)?)
            }
            MessageType::NetworkInfoRsp => {
                expect_len(NetworkInfoRsp::LEN)?;
                Self::NetworkInfoRsp(NetworkInfoRsp::decode(payload))
            }
            MessageType::CancelInferenceReq => {
                expect_len(CancelInferenceReq::LEN)?;
                Self::CancelInferenceReq(CancelInferenceReq::decode(payload))
            }
            MessageType::CancelInferenceRsp => {
                expect_len(CancelInferenceRsp::LEN)?;
                Self::CancelInferenceRsp(CancelInferenceRsp::decode(payload))
            }
        };

        Ok((message, header.msg_id))
    }
}
