// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Protocol Data Unit (PDU) definitions
//!
//! Common PDU structures used across the relaying components, together
//! with the flow key derived from the PDU header for multipath hashing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SerializationError;

/// Header flag: the PDU experienced congestion on its path.
pub const FLAG_EXPLICIT_CONGESTION: u8 = 0x01;

/// Protocol Data Unit (PDU) - the basic unit of data transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pdu {
    /// Source address
    pub src_addr: u64,
    /// Destination address
    pub dst_addr: u64,
    /// Source Connection Endpoint ID (CEP-ID)
    pub src_cep_id: u32,
    /// Destination Connection Endpoint ID (CEP-ID)
    pub dst_cep_id: u32,
    /// Sequence number for ordering and flow control
    pub sequence_num: u64,
    /// PDU type (data, ack, control)
    pub pdu_type: PduType,
    /// QoS class identifier (0 acts as a wildcard in forwarding lookups)
    pub qos_id: u32,
    /// Header flags
    pub flags: u8,
    /// Payload data
    pub payload: Vec<u8>,
}

/// Types of PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PduType {
    /// Data transfer PDU
    Data,
    /// Acknowledgment PDU
    Ack,
    /// Control PDU (e.g., flow control)
    Control,
    /// Management PDU (zero-loss treatment in schedulers)
    Management,
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduType::Data => write!(f, "DATA"),
            PduType::Ack => write!(f, "ACK"),
            PduType::Control => write!(f, "CONTROL"),
            PduType::Management => write!(f, "MANAGEMENT"),
        }
    }
}

impl Pdu {
    /// Creates a new data PDU in QoS class 0
    pub fn new_data(
        src_addr: u64,
        dst_addr: u64,
        src_cep_id: u32,
        dst_cep_id: u32,
        sequence_num: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_cep_id,
            dst_cep_id,
            sequence_num,
            pdu_type: PduType::Data,
            qos_id: 0,
            flags: 0,
            payload,
        }
    }

    /// Creates a new data PDU in the given QoS class
    pub fn new_data_with_qos(
        src_addr: u64,
        dst_addr: u64,
        src_cep_id: u32,
        dst_cep_id: u32,
        sequence_num: u64,
        qos_id: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_cep_id,
            dst_cep_id,
            sequence_num,
            pdu_type: PduType::Data,
            qos_id,
            flags: 0,
            payload,
        }
    }

    /// Creates a new ACK PDU
    pub fn new_ack(
        src_addr: u64,
        dst_addr: u64,
        src_cep_id: u32,
        dst_cep_id: u32,
        ack_num: u64,
    ) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_cep_id,
            dst_cep_id,
            sequence_num: ack_num,
            pdu_type: PduType::Ack,
            qos_id: 0,
            flags: 0,
            payload: Vec::new(),
        }
    }

    /// Creates a new management PDU
    pub fn new_management(src_addr: u64, dst_addr: u64, payload: Vec<u8>) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_cep_id: 0,
            dst_cep_id: 0,
            sequence_num: 0,
            pdu_type: PduType::Management,
            qos_id: 0,
            flags: 0,
            payload,
        }
    }

    /// Returns the destination address from the header
    pub fn destination(&self) -> u64 {
        self.dst_addr
    }

    /// Returns the QoS class identifier from the header
    pub fn qos_class(&self) -> u32 {
        self.qos_id
    }

    /// Returns the total size of the PDU in bytes
    pub fn size(&self) -> usize {
        // Header size + payload size
        // 8 + 8 + 4 + 4 + 8 + 1 (type) + 4 (qos) + 1 (flags) + payload
        38 + self.payload.len()
    }

    /// Checks if this is a data PDU
    pub fn is_data(&self) -> bool {
        self.pdu_type == PduType::Data
    }

    /// Checks if this is an ACK PDU
    pub fn is_ack(&self) -> bool {
        self.pdu_type == PduType::Ack
    }

    /// Checks if this is a management PDU
    pub fn is_management(&self) -> bool {
        self.pdu_type == PduType::Management
    }

    /// Sets the explicit congestion flag in the header
    pub fn mark_congestion(&mut self) {
        self.flags |= FLAG_EXPLICIT_CONGESTION;
    }

    /// Checks whether the explicit congestion flag is set
    pub fn is_congestion_marked(&self) -> bool {
        self.flags & FLAG_EXPLICIT_CONGESTION != 0
    }

    /// Serializes the PDU to bytes using postcard
    pub fn serialize(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserializes a PDU from bytes using postcard
    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// Connection identity of a PDU, used to pin a flow to one path.
///
/// Two PDUs of the same connection always produce the same key, so
/// hash-based link selection keeps a flow's ordering intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_addr: u64,
    pub dst_addr: u64,
    pub src_cep_id: u32,
    pub dst_cep_id: u32,
    pub qos_id: u32,
}

/// Size of the keyspace that [`FlowKey::hash16`] maps into.
pub const FLOW_KEYSPACE: u32 = u16::MAX as u32;

impl FlowKey {
    /// Extracts the flow key from a PDU header
    pub fn from_pdu(pdu: &Pdu) -> Self {
        Self {
            src_addr: pdu.src_addr,
            dst_addr: pdu.dst_addr,
            src_cep_id: pdu.src_cep_id,
            dst_cep_id: pdu.dst_cep_id,
            qos_id: pdu.qos_id,
        }
    }

    /// Hashes the key into the 16-bit keyspace.
    ///
    /// The field encoding is fixed little-endian so the same connection
    /// hashes identically on every node.
    pub fn hash16(&self) -> u16 {
        let mut bytes = [0u8; 28];
        bytes[0..8].copy_from_slice(&self.src_addr.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.dst_addr.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.src_cep_id.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.dst_cep_id.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.qos_id.to_le_bytes());
        crc16(0, &bytes)
    }
}

/// CRC-16/ARC over `data`, reflected polynomial 0xA001.
fn crc16(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
    }
    crc
}
