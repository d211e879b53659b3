//! Value object trait: equality by value, not identity.
//!
//! Thresholds, barcodes and status bands are value objects: they are
//! immutable, validated once at construction, and compared by their fields.

/// Marker trait for value objects.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Barcode(String);
///
/// impl ValueObject for Barcode {}
///
/// assert_eq!(Barcode("4006381333931".into()), Barcode("4006381333931".into()));
/// ```
///
/// To "modify" a value object, build a new one; constructors are where
/// validation lives.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
