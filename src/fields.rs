//! Fields - The global state record and its typed field identifiers
//!
//! Every field of the application's global state is declared once in the
//! [`global_fields!`] invocation at the bottom of this file. The macro
//! generates:
//!
//! - [`GlobalState`] - the flat record, one public member per field
//! - [`FieldSet`] - a bitflags set with one bit per field (dirty masks)
//! - `field::*` - a zero-sized marker per field implementing [`Field`]
//!
//! Accessors are generic over the marker, so a misspelled field is a compile
//! error rather than a silent `None`.
//!
//! # Example
//!
//! ```ignore
//! use global_bus::fields::{field, Field, GlobalState};
//!
//! let mut state = GlobalState::default();
//! *field::Progress::slot_mut(&mut state) = 42;
//! assert_eq!(field::Progress::NAME, "progress");
//! ```

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

// =============================================================================
// FIELD TRAIT
// =============================================================================

/// A typed identifier for one slot of [`GlobalState`].
pub trait Field: 'static {
    /// Value type of the slot. Fixed for the lifetime of the application.
    type Value: Clone + PartialEq + fmt::Debug + 'static;

    /// The field's bit in a [`FieldSet`].
    const KEY: FieldSet;

    /// The field's name as it appears in config and logs.
    const NAME: &'static str;

    fn slot(state: &GlobalState) -> &Self::Value;

    fn slot_mut(state: &mut GlobalState) -> &mut Self::Value;
}

// =============================================================================
// DATA HANDLE
// =============================================================================

/// Opaque handle to an external collaborator (the client-side data store).
///
/// Equality is pointer identity: two handles are equal only if they point at
/// the same allocation, or are both empty.
#[derive(Clone, Default)]
pub struct DataHandle(Option<Rc<dyn Any>>);

impl DataHandle {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Some(Rc::new(value)))
    }

    /// An empty handle.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the collaborator if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|inner| inner.downcast_ref::<T>())
    }
}

impl PartialEq for DataHandle {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(inner) => write!(f, "DataHandle({:p})", Rc::as_ptr(inner)),
            None => f.write_str("DataHandle(None)"),
        }
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

macro_rules! global_fields {
    (
        $(
            $(#[$meta:meta])*
            $name:ident : $ty:ty => $marker:ident, $flag:ident = $bit:expr;
        )*
    ) => {
        /// The flat record of global application fields.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default, deny_unknown_fields)]
        pub struct GlobalState {
            $(
                $(#[$meta])*
                pub $name: $ty,
            )*
        }

        bitflags::bitflags! {
            /// Set of field identifiers, one bit per field.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
            pub struct FieldSet: u32 {
                $( const $flag = 1 << $bit; )*
            }
        }

        /// Zero-sized field markers.
        pub mod field {
            use super::*;

            $(
                #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
                pub struct $marker;

                impl Field for $marker {
                    type Value = $ty;
                    const KEY: FieldSet = FieldSet::$flag;
                    const NAME: &'static str = stringify!($name);

                    fn slot(state: &GlobalState) -> &$ty {
                        &state.$name
                    }

                    fn slot_mut(state: &mut GlobalState) -> &mut $ty {
                        &mut state.$name
                    }
                }
            )*
        }

        impl GlobalState {
            /// Copy exactly the fields in `mask` from `src`.
            pub fn merge_masked(&mut self, src: &GlobalState, mask: FieldSet) {
                $(
                    if mask.contains(FieldSet::$flag) {
                        self.$name = src.$name.clone();
                    }
                )*
            }

            /// Fields whose values differ between `self` and `other`.
            pub fn diff(&self, other: &GlobalState) -> FieldSet {
                let mut changed = FieldSet::empty();
                $(
                    if self.$name != other.$name {
                        changed |= FieldSet::$flag;
                    }
                )*
                changed
            }
        }

        impl FieldSet {
            /// Look up a field bit by its config/log name (`"load_complete"`).
            ///
            /// Unlike bitflags' `from_name`, this matches the field name,
            /// not the constant name.
            pub fn from_field_name(name: &str) -> Option<FieldSet> {
                match name {
                    $( stringify!($name) => Some(FieldSet::$flag), )*
                    _ => None,
                }
            }

            /// Names of the fields in this set, in declaration order.
            pub fn names(self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if self.contains(FieldSet::$flag) {
                        names.push(stringify!($name));
                    }
                )*
                names
            }
        }
    };
}

global_fields! {
    /// Signed-in user id.
    user: Option<String> => User, USER = 0;
    /// Active organization (team) id.
    organization: Option<String> => Organization, ORGANIZATION = 1;
    /// Active project id.
    project: Option<String> => Project, PROJECT = 2;
    /// Active plan id.
    plan: Option<String> => Plan, PLAN = 3;
    /// Handle to the client-side data store.
    #[serde(skip)]
    memory: DataHandle => Memory, MEMORY = 4;
    /// UI language tag.
    lang: String => Lang, LANG = 5;
    offline: bool => Offline, OFFLINE = 6;
    /// Unsaved local edits exist.
    changed: bool => Changed, CHANGED = 7;
    load_complete: bool => LoadComplete, LOAD_COMPLETE = 8;
    /// A sync with the remote is in flight.
    remote_busy: bool => RemoteBusy, REMOTE_BUSY = 9;
    import_export_busy: bool => ImportExportBusy, IMPORT_EXPORT_BUSY = 10;
    /// Progress counter for long-running imports, exports and uploads.
    progress: u32 => Progress, PROGRESS = 11;
    /// Pending snack-bar message.
    snack_message: Option<String> => SnackMessage, SNACK_MESSAGE = 12;
}
