//! Type map - one value-kind tag per byte of a memory component
//!
//! Only loaded when runtime type checking is enabled. Unknown tag values
//! decode as [`AddressType::Undefined`].

use std::fmt;

/// Kind of value stored at an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressType {
    Undefined = 0,
    Ref = 1,
    Byte = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    UWord = 8,
    Bytecode = 9,
}

impl AddressType {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            1 => AddressType::Ref,
            2 => AddressType::Byte,
            3 => AddressType::Short,
            4 => AddressType::Int,
            5 => AddressType::Long,
            6 => AddressType::Float,
            7 => AddressType::Double,
            8 => AddressType::UWord,
            9 => AddressType::Bytecode,
            _ => AddressType::Undefined,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressType::Undefined => "undefined",
            AddressType::Ref => "ref",
            AddressType::Byte => "byte",
            AddressType::Short => "short",
            AddressType::Int => "int",
            AddressType::Long => "long",
            AddressType::Float => "float",
            AddressType::Double => "double",
            AddressType::UWord => "uword",
            AddressType::Bytecode => "bytecode",
        };
        f.write_str(name)
    }
}

/// Per-byte type tags of an object memory
#[derive(Clone, PartialEq, Eq)]
pub struct TypeMap {
    tags: Vec<u8>,
}

impl TypeMap {
    pub fn from_bytes(tags: Vec<u8>) -> Self {
        Self { tags }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Type of the byte at `offset`
    pub fn get(&self, offset: usize) -> Option<AddressType> {
        self.tags.get(offset).map(|tag| AddressType::from_tag(*tag))
    }

    /// Number of bytes tagged `kind`
    pub fn count(&self, kind: AddressType) -> usize {
        self.tags
            .iter()
            .filter(|tag| AddressType::from_tag(**tag) == kind)
            .count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.tags
    }
}

impl fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeMap {{ size = {} }}", self.tags.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        let map = TypeMap::from_bytes(vec![1, 1, 4, 200]);
        assert_eq!(map.get(0), Some(AddressType::Ref));
        assert_eq!(map.get(2), Some(AddressType::Int));
        assert_eq!(map.get(3), Some(AddressType::Undefined));
        assert_eq!(map.get(4), None);
        assert_eq!(map.count(AddressType::Ref), 2);
        assert_eq!(AddressType::Long.tag(), 5);
        assert_eq!(AddressType::Bytecode.to_string(), "bytecode");
    }
}
