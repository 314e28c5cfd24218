/// Defines an opaque entity id: a newtype over a v4 UUID.
///
/// `#[serde(transparent)]` makes the id serialize as the bare UUID string, which is how ids
/// appear in dumps, stats and notification targets.
macro_rules! uuid_based_wrapper_type {
    (
        $(#[$attrs:meta])*
        $name:ident
    ) => {
        $(#[$attrs])*
        #[derive(
            Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Deserialize,
            serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub(crate) fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// The wrapped UUID.
            #[must_use]
            pub fn into_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.into_uuid()
            }
        }
    };
}

pub(crate) use uuid_based_wrapper_type;
