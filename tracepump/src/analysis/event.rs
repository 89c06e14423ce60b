//! Borrowed views handed to analyzers.
//!
//! Every view borrows the decoded record in place and lives for exactly one
//! callback.

use std::fmt;
use std::marker::PhantomData;

use super::dispatch::{Dispatch, Field};
use super::session::{Channel, ChannelTable, SessionContext};
use crate::domain::{EventHash, ThreadId, Uid};

/// Location of one aux chunk inside a record's aux block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxSpan {
    pub field_index: u8,
    pub start: usize,
    pub len: usize,
}

/// Schema view of one event type.
#[derive(Debug, Clone, Copy)]
pub struct EventTypeInfo<'a> {
    dispatch: &'a Dispatch,
}

impl<'a> EventTypeInfo<'a> {
    pub(crate) fn new(dispatch: &'a Dispatch) -> Self {
        Self { dispatch }
    }

    #[must_use]
    pub fn uid(&self) -> Uid {
        self.dispatch.uid()
    }

    #[must_use]
    pub fn hash(&self) -> EventHash {
        self.dispatch.hash()
    }

    #[must_use]
    pub fn logger_name(&self) -> &'a str {
        self.dispatch.logger_name()
    }

    #[must_use]
    pub fn event_name(&self) -> &'a str {
        self.dispatch.event_name()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.dispatch.event_size()
    }

    #[must_use]
    pub fn is_important(&self) -> bool {
        self.dispatch.is_important()
    }

    #[must_use]
    pub fn maybe_has_aux(&self) -> bool {
        self.dispatch.maybe_has_aux()
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.dispatch.fields().len()
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<FieldInfo<'a>> {
        let field = self.dispatch.fields().get(index)?;
        Some(FieldInfo { dispatch: self.dispatch, field, index })
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldInfo<'a>> + 'a {
        let dispatch = self.dispatch;
        dispatch
            .fields()
            .iter()
            .enumerate()
            .map(move |(index, field)| FieldInfo { dispatch, field, index })
    }
}

/// Descriptor of one field.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo<'a> {
    dispatch: &'a Dispatch,
    field: &'a Field,
    index: usize,
}

impl<'a> FieldInfo<'a> {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        self.dispatch.field_name(self.field)
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        usize::from(self.field.byte_offset)
    }

    /// Width of one element in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.field.element_size()
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.field.is_array
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.field.is_signed
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        self.field.is_float()
    }
}

/// Raw value of one element before conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl Scalar {
    fn read(bytes: &[u8], field: &Field) -> Option<Self> {
        let mut word = [0u8; 8];
        let size = field.element_size();
        word.get_mut(..size)?.copy_from_slice(bytes.get(..size)?);
        let raw = u64::from_le_bytes(word);

        Some(if field.is_float() {
            match size {
                4 => Self::Float(f64::from(f32::from_bits(u32::try_from(raw).ok()?))),
                _ => Self::Float(f64::from_bits(raw)),
            }
        } else if field.is_signed {
            let shift = 64 - size * 8;
            #[allow(clippy::cast_possible_wrap)]
            let extended = ((raw << shift) as i64) >> shift;
            Self::Signed(extended)
        } else {
            Self::Unsigned(raw)
        })
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(value) => write!(f, "{value}"),
            Self::Signed(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

/// Types a field value can be read as. Conversions follow `as` casts.
pub trait FieldValue: Copy + 'static {
    fn from_scalar(scalar: Scalar) -> Self;
}

macro_rules! impl_field_value {
    ($($ty:ty),*) => {$(
        impl FieldValue for $ty {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss,
                clippy::cast_possible_wrap,
                clippy::cast_lossless
            )]
            fn from_scalar(scalar: Scalar) -> Self {
                match scalar {
                    Scalar::Unsigned(value) => value as $ty,
                    Scalar::Signed(value) => value as $ty,
                    Scalar::Float(value) => value as $ty,
                }
            }
        }
    )*};
}

impl_field_value!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

impl FieldValue for bool {
    fn from_scalar(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Unsigned(value) => value != 0,
            Scalar::Signed(value) => value != 0,
            Scalar::Float(value) => value != 0.0,
        }
    }
}

/// Lazy view over one array field's aux data. Empty when the record carried
/// no data for the field.
#[derive(Debug, Clone, Copy)]
pub struct ArrayReader<'a, T> {
    data: &'a [u8],
    field: Option<&'a Field>,
    _marker: PhantomData<T>,
}

impl<'a, T: FieldValue> ArrayReader<'a, T> {
    fn empty() -> Self {
        Self { data: &[], field: None, _marker: PhantomData }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.field.map_or(0, |field| self.data.len() / field.element_size())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        let field = self.field?;
        let size = field.element_size();
        let start = index.checked_mul(size)?;
        let bytes = self.data.get(start..start + size)?;
        Scalar::read(bytes, field).map(T::from_scalar)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let reader = *self;
        (0..reader.len()).filter_map(move |index| reader.get(index))
    }

    /// Raw element bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// One decoded record.
#[derive(Debug, Clone, Copy)]
pub struct EventData<'a> {
    dispatch: &'a Dispatch,
    fixed: &'a [u8],
    aux: &'a [u8],
    spans: &'a [AuxSpan],
    serial: Option<u32>,
}

impl<'a> EventData<'a> {
    pub(crate) fn new(
        dispatch: &'a Dispatch,
        fixed: &'a [u8],
        aux: &'a [u8],
        spans: &'a [AuxSpan],
        serial: Option<u32>,
    ) -> Self {
        Self { dispatch, fixed, aux, spans, serial }
    }

    #[must_use]
    pub fn type_info(&self) -> EventTypeInfo<'a> {
        EventTypeInfo::new(self.dispatch)
    }

    /// Serial from a protocol 2 header, when present.
    #[must_use]
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Fixed field bytes.
    #[must_use]
    pub fn raw(&self) -> &'a [u8] {
        self.fixed
    }

    /// Reads a fixed field. `None` when the field does not exist, is an
    /// array, or lies outside the record.
    #[must_use]
    pub fn value<T: FieldValue>(&self, name: &str) -> Option<T> {
        self.scalar(name).map(T::from_scalar)
    }

    /// Reads a fixed field without converting it.
    #[must_use]
    pub fn scalar(&self, name: &str) -> Option<Scalar> {
        let (_, field) = self.dispatch.find_field(name)?;
        if field.is_array {
            return None;
        }
        let start = usize::from(field.byte_offset);
        let bytes = self.fixed.get(start..start + field.element_size())?;
        Scalar::read(bytes, field)
    }

    /// Reads an array field carried as aux data.
    #[must_use]
    pub fn array<T: FieldValue>(&self, name: &str) -> ArrayReader<'a, T> {
        let Some((index, field)) = self.dispatch.find_field(name) else {
            return ArrayReader::empty();
        };
        if !field.is_array {
            return ArrayReader::empty();
        }
        match self.aux_data(index) {
            Some(data) => ArrayReader { data, field: Some(field), _marker: PhantomData },
            None => ArrayReader::empty(),
        }
    }

    /// Reads a byte array field as UTF-8 text.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&'a str> {
        let (index, field) = self.dispatch.find_field(name)?;
        if !field.is_array || field.element_size() != 1 {
            return None;
        }
        std::str::from_utf8(self.aux_data(index).unwrap_or_default()).ok()
    }

    fn aux_data(&self, field_index: usize) -> Option<&'a [u8]> {
        let span = self.spans.iter().find(|span| usize::from(span.field_index) == field_index)?;
        self.aux.get(span.start..span.start + span.len)
    }
}

/// Everything an analyzer sees for one routed event.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    session: &'a SessionContext,
    channels: &'a ChannelTable,
    thread: ThreadId,
    event: EventData<'a>,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(
        session: &'a SessionContext,
        channels: &'a ChannelTable,
        thread: ThreadId,
        event: EventData<'a>,
    ) -> Self {
        Self { session, channels, thread, event }
    }

    #[must_use]
    pub fn session(&self) -> &'a SessionContext {
        self.session
    }

    /// Producer thread whose substream carried the event.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    #[must_use]
    pub fn event(&self) -> &EventData<'a> {
        &self.event
    }

    #[must_use]
    pub fn channel(&self, id: u32) -> Option<&'a Channel> {
        self.channels.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dispatch::DispatchBuilder;
    use tracepump_common::{FIELD_ARRAY, FIELD_FLOAT, FIELD_SIGNED};

    fn dispatch() -> Dispatch {
        let mut builder = DispatchBuilder::new(Uid(5), "Test", "Sample", 0);
        builder
            .add_field("Delta", 0, 2, FIELD_SIGNED | 1)
            .unwrap()
            .add_field("Ratio", 2, 4, FIELD_FLOAT | 2)
            .unwrap()
            .add_field("Samples", 0, 0, FIELD_ARRAY | 2)
            .unwrap()
            .add_field("Label", 0, 0, FIELD_ARRAY)
            .unwrap();
        builder.finalize().unwrap()
    }

    #[test]
    fn test_signed_field_is_sign_extended() {
        let dispatch = dispatch();
        let mut fixed = (-3i16).to_le_bytes().to_vec();
        fixed.extend_from_slice(&1.5f32.to_le_bytes());
        let event = EventData::new(&dispatch, &fixed, &[], &[], None);

        assert_eq!(event.value::<i64>("Delta"), Some(-3));
        assert_eq!(event.value::<f64>("Ratio"), Some(1.5));
        assert_eq!(event.value::<u32>("Missing"), None);
        assert_eq!(event.value::<u32>("Samples"), None);
    }

    #[test]
    fn test_array_reads_matching_aux_span() {
        let dispatch = dispatch();
        let mut aux: Vec<u8> = b"cpu0".to_vec();
        for sample in [10u32, 20, 30] {
            aux.extend_from_slice(&sample.to_le_bytes());
        }
        let spans = [
            AuxSpan { field_index: 3, start: 0, len: 4 },
            AuxSpan { field_index: 2, start: 4, len: 12 },
        ];
        let event = EventData::new(&dispatch, &[0; 6], &aux, &spans, Some(4));

        let samples = event.array::<u32>("Samples");
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.get(1), Some(20));
        assert_eq!(samples.iter().sum::<u32>(), 60);
        assert_eq!(samples.iter().count(), 3);
        assert_eq!(event.string("Label"), Some("cpu0"));
        assert_eq!(event.serial(), Some(4));
    }

    #[test]
    fn test_missing_aux_reads_as_empty_array() {
        let dispatch = dispatch();
        let event = EventData::new(&dispatch, &[0; 6], &[], &[], None);
        assert!(event.array::<u32>("Samples").is_empty());
        assert_eq!(event.array::<u32>("Samples").get(0), None);
        assert_eq!(event.string("Label"), Some(""));
    }

    #[test]
    fn test_type_info_lists_fields() {
        let dispatch = dispatch();
        let info = EventTypeInfo::new(&dispatch);
        let names: Vec<&str> = info.fields().map(|field| field.name()).collect();
        assert_eq!(names, vec!["Delta", "Ratio", "Samples", "Label"]);
        assert!(info.field(1).unwrap().is_float());
        assert!(info.field(9).is_none());
    }
}
