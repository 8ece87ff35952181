//! Non-owning membership of an entity in a name-keyed map
//!
//! Routines live in the experiment's routine map and loop initiators in its
//! loop map, both keyed by the entity's own name. The entity keeps a weak
//! handle to that map so that renaming it re-keys the map in place.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::{Error, Result};

/// A name-keyed map shared between its owner and its entries.
pub(crate) type SharedMap<V> = Rc<RefCell<IndexMap<String, V>>>;

/// Map values that can tell whether they are a given entity.
pub(crate) trait Keyed {
    /// Whether this value points at the entity stored at `target`.
    fn is_entity(&self, target: *const ()) -> bool;
}

/// Weak handle to the map an entity is keyed in.
pub(crate) struct Owner<V>(Weak<RefCell<IndexMap<String, V>>>);

impl<V> Owner<V> {
    pub(crate) fn new(map: &SharedMap<V>) -> Self {
        Self(Rc::downgrade(map))
    }
}

impl<V: Keyed> Owner<V> {
    /// Rename the entity at `target` from `old` to `new`.
    ///
    /// `apply` writes the new name into the entity. When the entity is keyed
    /// under `old` in a live map, the key is replaced at the same position;
    /// a `new` key held by another entry is rejected through `duplicate`
    /// before anything changes.
    pub(crate) fn rename(
        &self,
        target: *const (),
        old: Option<String>,
        new: &str,
        duplicate: impl FnOnce(String) -> Error,
        apply: impl FnOnce(),
    ) -> Result<()> {
        let Some(map) = self.0.upgrade() else {
            apply();
            return Ok(());
        };
        let Ok(mut map) = map.try_borrow_mut() else {
            return Err(Error::NameMapBorrowed { name: new.to_string() });
        };
        // unnamed entities are keyed under the empty name
        let old = old.unwrap_or_default();
        let index = map
            .get_full(old.as_str())
            .filter(|(_, _, value)| value.is_entity(target))
            .map(|(index, _, _)| index);
        let Some(index) = index else {
            apply();
            return Ok(());
        };
        if old == new {
            return Ok(());
        }
        if map.contains_key(new) {
            return Err(duplicate(new.to_string()));
        }

        apply();
        if let Some((_, value)) = map.shift_remove_index(index) {
            map.shift_insert(index, new.to_string(), value);
        }
        Ok(())
    }
}

impl<V> Default for Owner<V> {
    fn default() -> Self {
        Self(Weak::new())
    }
}

impl<V> Clone for Owner<V> {
    fn clone(&self) -> Self {
        Self(Weak::clone(&self.0))
    }
}

impl<V> std::fmt::Debug for Owner<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owner").field(&(self.0.strong_count() > 0)).finish()
    }
}

/// Address of `entity`, for comparison with [`Keyed::is_entity`].
pub(crate) fn address_of<T>(entity: &T) -> *const () {
    std::ptr::addr_of!(*entity).cast()
}

/// Whether the shared cell holds the entity at `target`.
pub(crate) fn holds<T>(cell: &RefCell<T>, target: *const ()) -> bool {
    std::ptr::eq(cell.as_ptr().cast_const().cast::<()>(), target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Named {
        name: String,
        owner: Owner<Rc<RefCell<Named>>>,
    }

    impl Keyed for Rc<RefCell<Named>> {
        fn is_entity(&self, target: *const ()) -> bool {
            holds(&**self, target)
        }
    }

    impl Named {
        fn rename(&mut self, name: &str) -> Result<()> {
            let target = address_of(self);
            let old = Some(self.name.clone());
            let owner = self.owner.clone();
            owner.rename(
                target,
                old,
                name,
                |name| Error::DuplicateRoutine { name },
                || self.name = name.to_string(),
            )
        }
    }

    fn keyed(map: &SharedMap<Rc<RefCell<Named>>>, name: &str) -> Rc<RefCell<Named>> {
        let entity = Rc::new(RefCell::new(Named {
            name: name.to_string(),
            owner: Owner::new(map),
        }));
        map.borrow_mut().insert(name.to_string(), Rc::clone(&entity));
        entity
    }

    #[test]
    fn test_rename_rekeys_in_place() {
        let map: SharedMap<Rc<RefCell<Named>>> = Rc::default();
        let a = keyed(&map, "a");
        keyed(&map, "b");

        a.borrow_mut().rename("c").unwrap();

        assert_eq!(map.borrow().keys().collect::<Vec<_>>(), ["c", "b"]);
        assert!(Rc::ptr_eq(&map.borrow()["c"], &a));
    }

    #[test]
    fn test_rename_collision_changes_nothing() {
        let map: SharedMap<Rc<RefCell<Named>>> = Rc::default();
        let a = keyed(&map, "a");
        keyed(&map, "b");

        assert!(matches!(
            a.borrow_mut().rename("b"),
            Err(Error::DuplicateRoutine { ref name }) if name == "b"
        ));
        assert_eq!(a.borrow().name, "a");
        assert_eq!(map.borrow().keys().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_copy_outside_the_map_renames_alone() {
        let map: SharedMap<Rc<RefCell<Named>>> = Rc::default();
        let a = keyed(&map, "a");
        let mut copy = Named {
            name: "a".to_string(),
            owner: a.borrow().owner.clone(),
        };

        copy.rename("z").unwrap();

        assert_eq!(copy.name, "z");
        assert_eq!(map.borrow().keys().collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn test_rename_while_map_borrowed() {
        let map: SharedMap<Rc<RefCell<Named>>> = Rc::default();
        let a = keyed(&map, "a");
        let _held = map.borrow();

        assert!(matches!(a.borrow_mut().rename("b"), Err(Error::NameMapBorrowed { .. })));
        assert_eq!(a.borrow().name, "a");
    }
}
