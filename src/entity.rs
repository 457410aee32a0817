//! Core entity trait and the optional capabilities an entity may expose.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt::Debug;
use uuid::Uuid;

/// Trait that all persisted entities must implement.
///
/// Entities travel to and from the store as JSON objects, so field names in
/// filter, sort and projection expressions are the serialized field names.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use crud_kit::entity::{Entity, HasSysUser};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "PascalCase")]
/// pub struct Movie {
///     pub id: i64,
///     pub title: String,
///     pub sys_user: Option<String>,
/// }
///
/// impl HasSysUser for Movie {
///     fn sys_user(&self) -> Option<&str> {
///         self.sys_user.as_deref()
///     }
///
///     fn set_sys_user(&mut self, user: &str) {
///         self.sys_user = Some(user.to_string());
///     }
/// }
///
/// impl Entity for Movie {
///     type Key = i64;
///
///     fn key(&self) -> Self::Key {
///         self.id
///     }
///
///     fn table_name() -> &'static str {
///         "movies"
///     }
///
///     fn as_sys_user_mut(&mut self) -> Option<&mut dyn HasSysUser> {
///         Some(self)
///     }
/// }
/// ```
pub trait Entity: Send + Sync + Serialize + DeserializeOwned + Clone + 'static {
    /// Primary key type. Composite keys use tuples.
    type Key: Serialize + Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Return the entity's primary key.
    fn key(&self) -> Self::Key;

    /// Name of the table (collection) holding this entity type.
    fn table_name() -> &'static str;

    /// Capability: "last modified by" audit field.
    fn as_sys_user_mut(&mut self) -> Option<&mut dyn HasSysUser> {
        None
    }

    /// Capability: globally unique identifier, read access.
    fn as_sys_guid(&self) -> Option<&dyn HasSysGuid> {
        None
    }

    /// Capability: globally unique identifier, assigned once on create.
    fn as_sys_guid_mut(&mut self) -> Option<&mut dyn HasSysGuid> {
        None
    }

    /// Capability: integer primary key generated by the store when `0`.
    fn as_integer_id_mut(&mut self) -> Option<&mut dyn HasIntegerId> {
        None
    }

    /// Optional: Validate the entity before it is written.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Entity carries a mutable "last modified by" field.
pub trait HasSysUser {
    fn sys_user(&self) -> Option<&str>;
    fn set_sys_user(&mut self, user: &str);
}

/// Entity carries a globally unique identifier.
///
/// The nil UUID means "unset"; the create path replaces it with a fresh v4.
pub trait HasSysGuid {
    fn sys_guid(&self) -> Uuid;
    fn set_sys_guid(&mut self, guid: Uuid);
}

/// Entity has an integer primary key.
pub trait HasIntegerId {
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

/// Type-erased view of an entity held by a unit of work.
///
/// Lets one change set carry entities of different types while still
/// reaching each entry's audit capability.
pub(crate) trait Tracked: Send + Sync {
    fn table(&self) -> &'static str;
    fn row_key(&self) -> Result<String>;
    fn to_row(&self) -> Result<serde_json::Value>;
    fn sys_user_mut(&mut self) -> Option<&mut dyn HasSysUser>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> Tracked for T {
    fn table(&self) -> &'static str {
        T::table_name()
    }

    fn row_key(&self) -> Result<String> {
        crate::key::RowKey::of::<T>(&self.key())
    }

    fn to_row(&self) -> Result<serde_json::Value> {
        crate::serialization::to_row(self)
    }

    fn sys_user_mut(&mut self) -> Option<&mut dyn HasSysUser> {
        self.as_sys_user_mut()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct Plain {
        id: String,
    }

    impl Entity for Plain {
        type Key = String;

        fn key(&self) -> Self::Key {
            self.id.clone()
        }

        fn table_name() -> &'static str {
            "plain"
        }
    }

    #[derive(Clone, Serialize, Deserialize)]
    struct Audited {
        id: i64,
        guid: Uuid,
        user: Option<String>,
    }

    impl HasSysUser for Audited {
        fn sys_user(&self) -> Option<&str> {
            self.user.as_deref()
        }

        fn set_sys_user(&mut self, user: &str) {
            self.user = Some(user.to_string());
        }
    }

    impl HasSysGuid for Audited {
        fn sys_guid(&self) -> Uuid {
            self.guid
        }

        fn set_sys_guid(&mut self, guid: Uuid) {
            self.guid = guid;
        }
    }

    impl Entity for Audited {
        type Key = i64;

        fn key(&self) -> Self::Key {
            self.id
        }

        fn table_name() -> &'static str {
            "audited"
        }

        fn as_sys_user_mut(&mut self) -> Option<&mut dyn HasSysUser> {
            Some(self)
        }

        fn as_sys_guid(&self) -> Option<&dyn HasSysGuid> {
            Some(self)
        }

        fn as_sys_guid_mut(&mut self) -> Option<&mut dyn HasSysGuid> {
            Some(self)
        }
    }

    #[test]
    fn test_capabilities_default_to_none() {
        let mut plain = Plain {
            id: "p1".to_string(),
        };
        assert!(plain.as_sys_user_mut().is_none());
        assert!(plain.as_sys_guid().is_none());
        assert!(plain.as_integer_id_mut().is_none());
        assert_eq!(plain.key(), "p1");
    }

    #[test]
    fn test_tracked_reaches_audit_capability() {
        let mut boxed: Box<dyn Tracked> = Box::new(Audited {
            id: 7,
            guid: Uuid::nil(),
            user: None,
        });

        boxed
            .sys_user_mut()
            .expect("audited entity exposes sys user")
            .set_sys_user("alice");

        let audited = boxed
            .as_any()
            .downcast_ref::<Audited>()
            .expect("downcast to concrete type");
        assert_eq!(audited.user.as_deref(), Some("alice"));
        assert_eq!(boxed.table(), "audited");
        assert_eq!(boxed.row_key().expect("row key"), "7");
    }
}
