// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Error types for REMUX
//!
//! This module provides typed errors for all relaying components,
//! replacing string-based errors with structured error types.

use thiserror::Error;

/// Main error type for REMUX operations
#[derive(Error, Debug)]
pub enum RemuxError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Forwarding error: {0}")]
    Forwarding(#[from] ForwardingError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    #[error("Egress error: {0}")]
    Egress(#[from] EgressError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Actor channel closed")]
    ChannelClosed,

    #[error("Operation timed out")]
    Timeout,
}

/// Policy registry errors
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Policy set already published: {0}")]
    DuplicateName(String),

    #[error("Policy set not found: {0}")]
    NotFound(String),

    #[error("Policy set busy, instances still attached: {0}")]
    Busy(String),

    #[error("Policy set {policy} does not provide required operation {operation}")]
    ValidationFailed { policy: String, operation: String },

    #[error("Policy set instantiation failed for {policy}: {reason}")]
    InstantiationFailed { policy: String, reason: String },
}

/// Forwarding table and forwarding policy errors
#[derive(Error, Debug, Clone)]
pub enum ForwardingError {
    #[error("No route to destination {destination} with QoS class {qos}")]
    NoRoute { destination: u64, qos: u32 },

    #[error("No entry for destination {destination} with QoS class {qos}")]
    EntryNotFound { destination: u64, qos: u32 },

    #[error("Invalid destination address: {0}")]
    InvalidDestination(u64),

    #[error("Invalid link identifier: {0}")]
    InvalidLink(u64),

    #[error("Request for destination {0} carries no alternatives")]
    EmptyAlternatives(u64),

    #[error("Entry already exists for destination {destination} with QoS class {qos}")]
    DuplicateEntry { destination: u64, qos: u32 },

    #[error("Link {link} is not the primary of entry {destination}")]
    PrimaryMismatch { destination: u64, link: u64 },

    #[error("Operation not supported by this forwarding policy: {0}")]
    Unsupported(&'static str),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },
}

/// Scheduling and queue discipline errors
#[derive(Error, Debug, Clone)]
pub enum SchedulingError {
    #[error("No queue set exists for link {0}")]
    UnknownQueueSet(u64),

    #[error("Queue set already exists for link {0}")]
    QueueSetExists(u64),

    #[error("No profile configured for QoS class {0}")]
    UnknownQosClass(u32),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },

    #[error("Unknown link: {0}")]
    UnknownLink(u64),

    #[error("Link {0} already registered")]
    LinkExists(u64),

    #[error("Link {0} is deallocated")]
    LinkDeallocated(u64),

    #[error("Operation not supported by this scheduling policy: {0}")]
    Unsupported(&'static str),
}

/// Credit window and congestion feedback errors
#[derive(Error, Debug, Clone)]
pub enum CreditError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },
}

/// Egress transmission errors
#[derive(Error, Debug, Clone)]
pub enum EgressError {
    #[error("Link closed: {0}")]
    LinkClosed(u64),

    #[error("Transmit failed on link {link}: {reason}")]
    TransmitFailed { link: u64, reason: String },
}

/// Serialization/deserialization errors
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Postcard serialization failed: {0}")]
    PostcardSerialization(#[from] postcard::Error),

    #[error("JSON serialization failed: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

// Conversion from String for callers that only carry a message
impl From<String> for RemuxError {
    fn from(s: String) -> Self {
        RemuxError::Config(s)
    }
}

impl From<&str> for RemuxError {
    fn from(s: &str) -> Self {
        RemuxError::Config(s.to_string())
    }
}

// Enable conversion to String for the actor response channels
impl From<RemuxError> for String {
    fn from(err: RemuxError) -> Self {
        err.to_string()
    }
}

impl From<RegistryError> for String {
    fn from(err: RegistryError) -> Self {
        err.to_string()
    }
}

impl From<ForwardingError> for String {
    fn from(err: ForwardingError) -> Self {
        err.to_string()
    }
}

impl From<SchedulingError> for String {
    fn from(err: SchedulingError) -> Self {
        err.to_string()
    }
}

impl From<CreditError> for String {
    fn from(err: CreditError) -> Self {
        err.to_string()
    }
}

impl From<EgressError> for String {
    fn from(err: EgressError) -> Self {
        err.to_string()
    }
}
