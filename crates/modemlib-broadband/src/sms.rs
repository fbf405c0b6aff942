//! Received message bookkeeping.
//!
//! Messages arrive as parts. A part that belongs to a concatenated message
//! carries a reference shared by all its siblings, the total number of parts,
//! and its own 1-based sequence number. [`SmsList::take_part`] files each
//! part into an existing multipart [`Sms`] or starts a new one.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use modemlib_core::error::{Error, Result};

/// Index of a part that is not stored on the modem.
pub const SMS_PART_INVALID_INDEX: u32 = u32::MAX;

/// Message storage on the modem (`+CPMS` memory names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SmsStorage {
    #[default]
    Unknown,
    Sm,
    Me,
    Mt,
    Sr,
    Bm,
    Ta,
}

impl SmsStorage {
    /// Parse a memory name as used in `+CMTI` and `+CPMS`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().trim_matches('"').to_ascii_uppercase().as_str() {
            "SM" => SmsStorage::Sm,
            "ME" => SmsStorage::Me,
            "MT" => SmsStorage::Mt,
            "SR" => SmsStorage::Sr,
            "BM" => SmsStorage::Bm,
            "TA" => SmsStorage::Ta,
            _ => SmsStorage::Unknown,
        }
    }
}

impl fmt::Display for SmsStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmsStorage::Unknown => "unknown",
            SmsStorage::Sm => "sm",
            SmsStorage::Me => "me",
            SmsStorage::Mt => "mt",
            SmsStorage::Sr => "sr",
            SmsStorage::Bm => "bm",
            SmsStorage::Ta => "ta",
        };
        write!(f, "{s}")
    }
}

/// One received part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsPart {
    pub storage: SmsStorage,
    /// Storage index, [`SMS_PART_INVALID_INDEX`] when not stored.
    pub index: u32,
    pub concat_reference: u32,
    pub concat_max: u32,
    /// 1-based position in a concatenated message; `0` for single parts.
    pub concat_sequence: u32,
    pub number: Option<String>,
    pub text: Option<String>,
}

impl SmsPart {
    pub fn new(storage: SmsStorage, index: u32) -> Self {
        SmsPart {
            storage,
            index,
            concat_reference: 0,
            concat_max: 0,
            concat_sequence: 0,
            number: None,
            text: None,
        }
    }

    pub fn with_concat(mut self, reference: u32, max: u32, sequence: u32) -> Self {
        self.concat_reference = reference;
        self.concat_max = max;
        self.concat_sequence = sequence;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    /// `true` when this part must be joined with its siblings.
    pub fn should_concat(&self) -> bool {
        self.concat_sequence != 0
    }
}

/// A message assembled from one or more parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sms {
    storage: SmsStorage,
    multipart: bool,
    reference: u32,
    max_parts: u32,
    /// Sorted by sequence.
    parts: Vec<SmsPart>,
}

impl Sms {
    fn singlepart(part: SmsPart) -> Self {
        Sms {
            storage: part.storage,
            multipart: false,
            reference: 0,
            max_parts: 1,
            parts: vec![part],
        }
    }

    fn multipart(part: SmsPart) -> Result<Self> {
        let mut sms = Sms {
            storage: part.storage,
            multipart: true,
            reference: part.concat_reference,
            max_parts: part.concat_max,
            parts: Vec::new(),
        };
        sms.take_part(part)?;
        Ok(sms)
    }

    /// Add a sibling part of a multipart message.
    pub fn take_part(&mut self, part: SmsPart) -> Result<()> {
        if !self.multipart {
            return Err(Error::InvalidParameter(
                "not a multipart message".into(),
            ));
        }
        if self.parts.len() >= self.max_parts as usize {
            return Err(Error::InvalidParameter(format!(
                "already took {} parts, cannot take more",
                self.parts.len()
            )));
        }
        let sequence = part.concat_sequence;
        if self.parts.iter().any(|p| p.concat_sequence == sequence) {
            return Err(Error::InvalidParameter(format!(
                "sequence {sequence} already taken"
            )));
        }
        if sequence > self.max_parts {
            return Err(Error::InvalidParameter(format!(
                "cannot take part with sequence {sequence}, maximum is {}",
                self.max_parts
            )));
        }
        let pos = self.parts.partition_point(|p| p.concat_sequence < sequence);
        self.parts.insert(pos, part);
        Ok(())
    }

    pub fn storage(&self) -> SmsStorage {
        self.storage
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    pub fn reference(&self) -> u32 {
        self.reference
    }

    pub fn max_parts(&self) -> u32 {
        self.max_parts
    }

    pub fn parts(&self) -> &[SmsPart] {
        &self.parts
    }

    /// All parts have arrived.
    pub fn is_complete(&self) -> bool {
        self.parts.len() == self.max_parts as usize
    }

    /// Concatenated text, `None` until the message is complete.
    pub fn text(&self) -> Option<String> {
        if !self.is_complete() {
            return None;
        }
        Some(
            self.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect(),
        )
    }

    /// Sender number, taken from the first part.
    pub fn number(&self) -> Option<&str> {
        self.parts.first().and_then(|p| p.number.as_deref())
    }

    fn has_part(&self, storage: SmsStorage, index: u32) -> bool {
        self.storage == storage && self.parts.iter().any(|p| p.index == index)
    }
}

/// Messages known to a modem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SmsList {
    messages: Vec<Sms>,
}

impl SmsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if a part stored at `storage`/`index` was already taken.
    ///
    /// Parts in unknown storage or without an index are never considered
    /// duplicates.
    pub fn has_part(&self, storage: SmsStorage, index: u32) -> bool {
        if storage == SmsStorage::Unknown || index == SMS_PART_INVALID_INDEX {
            return false;
        }
        self.messages.iter().any(|sms| sms.has_part(storage, index))
    }

    /// File `part` into the list.
    ///
    /// Returns `true` when the message the part belongs to is complete.
    pub fn take_part(&mut self, part: SmsPart) -> Result<bool> {
        if self.has_part(part.storage, part.index) {
            return Err(Error::InvalidParameter(format!(
                "a part with index {} was already taken",
                part.index
            )));
        }

        if !part.should_concat() {
            debug!(storage = %part.storage, index = part.index, "single-part message");
            self.messages.push(Sms::singlepart(part));
            return Ok(true);
        }

        debug!(
            reference = part.concat_reference,
            sequence = part.concat_sequence,
            max = part.concat_max,
            "multipart message part"
        );
        let existing = self
            .messages
            .iter_mut()
            .find(|sms| sms.multipart && sms.reference == part.concat_reference);
        match existing {
            Some(sms) => {
                sms.take_part(part)?;
                Ok(sms.is_complete())
            }
            None => {
                let sms = Sms::multipart(part)?;
                let complete = sms.is_complete();
                self.messages.push(sms);
                Ok(complete)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sms> {
        self.messages.iter()
    }
}
