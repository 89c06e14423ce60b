//! Event schemas declared inside the stream.
//!
//! A [`Dispatch`] is built once from a NewEvent declaration and never changes
//! afterwards, apart from the cached route lookup filled in when the session
//! begins. [`DispatchTable`] owns every dispatch of a session; the uid is only
//! a lookup key into it.

use tracepump_common::{
    FieldDesc, NewEventHeader, FIELD_ARRAY, FIELD_FLOAT, FIELD_POW2_SIZE_MASK, FIELD_SIGNED,
    FLAG_IMPORTANT, FLAG_MAYBE_HAS_AUX, FLAG_NO_SYNC, UID_MASK,
};

use crate::domain::{EventHash, ProtocolVersion, SchemaError, Uid};

/// One field of an event schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Offset of the name inside the owning dispatch's name arena.
    pub(crate) name_offset: u16,
    pub(crate) name_size: u8,
    pub(crate) hash: EventHash,
    pub(crate) byte_offset: u16,
    /// Width of one element in bytes.
    pub(crate) byte_size: u16,
    /// Positive for integer widths, negative for float widths.
    pub(crate) signed_size: i8,
    pub(crate) is_signed: bool,
    pub(crate) is_array: bool,
}

impl Field {
    /// Decodes a `type_info` byte into `(element_size, signed_size, is_signed, is_array)`.
    fn decode_type(type_info: u8) -> Result<(u16, i8, bool, bool), &'static str> {
        let element_size: u8 = 1 << (type_info & FIELD_POW2_SIZE_MASK);
        let is_float = type_info & FIELD_FLOAT != 0;
        let is_signed = type_info & FIELD_SIGNED != 0;
        if is_float && element_size < 4 {
            return Err("float fields must be 4 or 8 bytes wide");
        }
        if is_float && is_signed {
            return Err("float fields cannot carry the signed bit");
        }
        let width = i8::try_from(element_size).map_err(|_| "element width out of range")?;
        let signed_size = if is_float { -width } else { width };
        Ok((u16::from(element_size), signed_size, is_signed, type_info & FIELD_ARRAY != 0))
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        self.signed_size < 0
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        usize::from(self.byte_size)
    }
}

/// Decoded schema for one event type.
#[derive(Debug, Clone)]
pub struct Dispatch {
    uid: Uid,
    hash: EventHash,
    flags: u8,
    event_size: u16,
    first_route: Option<usize>,
    logger_name_size: usize,
    event_name_size: usize,
    fields: Vec<Field>,
    /// Logger name, event name, then every field name, back to back.
    names: String,
}

impl Dispatch {
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    #[must_use]
    pub fn hash(&self) -> EventHash {
        self.hash
    }

    #[must_use]
    pub fn logger_name(&self) -> &str {
        &self.names[..self.logger_name_size]
    }

    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.names[self.logger_name_size..self.logger_name_size + self.event_name_size]
    }

    /// Bytes of fixed field data, i.e. the end of the last non-array field.
    #[must_use]
    pub fn event_size(&self) -> usize {
        usize::from(self.event_size)
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field_name(&self, field: &Field) -> &str {
        let start = usize::from(field.name_offset);
        &self.names[start..start + usize::from(field.name_size)]
    }

    /// Finds a field by name, comparing hashes before bytes.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<(usize, &Field)> {
        let hash = EventHash::of_bytes(name.as_bytes());
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.hash == hash && self.field_name(field) == name)
    }

    #[must_use]
    pub fn is_important(&self) -> bool {
        self.flags & FLAG_IMPORTANT != 0
    }

    #[must_use]
    pub fn maybe_has_aux(&self) -> bool {
        self.flags & FLAG_MAYBE_HAS_AUX != 0
    }

    #[must_use]
    pub fn is_no_sync(&self) -> bool {
        self.flags & FLAG_NO_SYNC != 0
    }

    /// Index of the first route subscribed to this dispatch's hash, cached
    /// when the session begins.
    #[must_use]
    pub fn first_route(&self) -> Option<usize> {
        self.first_route
    }

    pub(crate) fn set_first_route(&mut self, first_route: Option<usize>) {
        self.first_route = first_route;
    }
}

/// Stages a dispatch's header, fields and field names separately and joins
/// them on [`finalize`](Self::finalize).
#[derive(Debug)]
pub struct DispatchBuilder {
    uid: Uid,
    flags: u8,
    logger: String,
    event: String,
    fields: Vec<Field>,
    field_names: String,
}

impl DispatchBuilder {
    #[must_use]
    pub fn new(uid: Uid, logger: &str, event: &str, flags: u8) -> Self {
        Self {
            uid,
            flags,
            logger: logger.to_owned(),
            event: event.to_owned(),
            fields: Vec::new(),
            field_names: String::new(),
        }
    }

    /// Adds a field described by its wire `type_info` byte.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::CorruptField`] for an impossible type, a fixed
    /// field whose size disagrees with its type, or a name that is too long.
    pub fn add_field(
        &mut self,
        name: &str,
        byte_offset: u16,
        byte_size: u16,
        type_info: u8,
    ) -> Result<&mut Self, SchemaError> {
        let index = self.fields.len();
        let corrupt = |reason| SchemaError::CorruptField { uid: self.uid, field: index, reason };

        let (element_size, signed_size, is_signed, is_array) =
            Field::decode_type(type_info).map_err(corrupt)?;
        if !is_array && byte_size != element_size {
            return Err(corrupt("field size does not match its type"));
        }
        if u32::from(byte_offset) + u32::from(byte_size) > u32::from(u16::MAX) {
            return Err(corrupt("field extends past the largest event size"));
        }
        let name_size = u8::try_from(name.len()).map_err(|_| corrupt("field name too long"))?;
        let name_offset =
            u16::try_from(self.field_names.len()).map_err(|_| corrupt("field names too long"))?;

        self.field_names.push_str(name);
        self.fields.push(Field {
            name_offset,
            name_size,
            hash: EventHash::of_bytes(name.as_bytes()),
            byte_offset: if is_array { 0 } else { byte_offset },
            byte_size: element_size,
            signed_size,
            is_signed,
            is_array,
        });
        Ok(self)
    }

    /// Joins the staged parts into one dispatch and fixes up field name
    /// offsets to point into the joined name arena.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::CorruptField`] when the joined names no longer
    /// fit the 16-bit name offsets.
    pub fn finalize(self) -> Result<Dispatch, SchemaError> {
        let base = self.logger.len() + self.event.len();
        let mut names = String::with_capacity(base + self.field_names.len());
        names.push_str(&self.logger);
        names.push_str(&self.event);
        names.push_str(&self.field_names);

        let hash = if self.uid.is_control() {
            EventHash::control(self.uid)
        } else {
            EventHash::of_bytes(&names.as_bytes()[..base])
        };

        let mut fields = self.fields;
        let mut event_size = 0u16;
        for (index, field) in fields.iter_mut().enumerate() {
            field.name_offset = u16::try_from(base + usize::from(field.name_offset)).map_err(|_| {
                SchemaError::CorruptField { uid: self.uid, field: index, reason: "names too long" }
            })?;
            if !field.is_array {
                event_size = event_size.max(field.byte_offset + field.byte_size);
            }
        }

        Ok(Dispatch {
            uid: self.uid,
            hash,
            flags: self.flags,
            event_size,
            first_route: None,
            logger_name_size: self.logger.len(),
            event_name_size: self.event.len(),
            fields,
            names,
        })
    }
}

/// Parses a NewEvent payload into a dispatch.
///
/// # Errors
///
/// Returns the [`SchemaError`] describing why the declaration is unusable.
pub fn parse_new_event(payload: &[u8], protocol: ProtocolVersion) -> Result<Dispatch, SchemaError> {
    let header =
        NewEventHeader::parse(payload).ok_or(SchemaError::Truncated { uid: Uid::NEW_EVENT })?;
    let uid = Uid(header.uid);
    if uid == Uid::NEW_EVENT || header.uid > UID_MASK {
        return Err(SchemaError::ReservedUid(uid));
    }
    let flags = if protocol.has_aux() { header.flags } else { 0 };

    let field_count = usize::from(header.field_count);
    let descriptors_end = NewEventHeader::SIZE + field_count * FieldDesc::SIZE;
    let descriptors = payload.get(NewEventHeader::SIZE..descriptors_end).ok_or(SchemaError::Truncated { uid })?;
    let descriptors: Vec<FieldDesc> =
        descriptors.chunks_exact(FieldDesc::SIZE).filter_map(FieldDesc::parse).collect();

    let mut names = NameCursor { bytes: payload, offset: descriptors_end, uid };
    let logger = names.next(usize::from(header.logger_name_size))?;
    let event = names.next(usize::from(header.event_name_size))?;

    let mut builder = DispatchBuilder::new(uid, logger, event, flags);
    for desc in &descriptors {
        let name = names.next(usize::from(desc.name_size))?;
        builder.add_field(name, desc.offset, desc.size, desc.type_info)?;
    }
    builder.finalize()
}

struct NameCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
    uid: Uid,
}

impl<'a> NameCursor<'a> {
    fn next(&mut self, size: usize) -> Result<&'a str, SchemaError> {
        let bytes = self
            .bytes
            .get(self.offset..self.offset + size)
            .ok_or(SchemaError::Truncated { uid: self.uid })?;
        self.offset += size;
        std::str::from_utf8(bytes).map_err(|_| SchemaError::InvalidName { uid: self.uid })
    }
}

/// Append-only dispatch arena indexed by uid.
#[derive(Debug, Default)]
pub struct DispatchTable {
    arena: Vec<Dispatch>,
    by_uid: Vec<Option<usize>>,
}

impl DispatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a dispatch and returns its arena index.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateUid`] and leaves the table unchanged
    /// when the uid is already declared.
    pub fn insert(&mut self, dispatch: Dispatch) -> Result<usize, SchemaError> {
        let slot = dispatch.uid.index();
        if self.by_uid.len() <= slot {
            self.by_uid.resize(slot + 1, None);
        }
        if self.by_uid[slot].is_some() {
            return Err(SchemaError::DuplicateUid(dispatch.uid));
        }
        self.arena.push(dispatch);
        let index = self.arena.len() - 1;
        self.by_uid[slot] = Some(index);
        Ok(index)
    }

    #[must_use]
    pub fn index_of(&self, uid: Uid) -> Option<usize> {
        self.by_uid.get(uid.index()).copied().flatten()
    }

    #[must_use]
    pub fn get(&self, uid: Uid) -> Option<&Dispatch> {
        self.index_of(uid).map(|index| &self.arena[index])
    }

    #[must_use]
    pub fn at(&self, index: usize) -> &Dispatch {
        &self.arena[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dispatch> {
        self.arena.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Dispatch> {
        self.arena.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
