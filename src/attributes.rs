//! Resolves the effective notification attributes (pmin/pmax/epmin/epmax/
//! gt/lt/st/con) for a path and server, walking the inheritance chain
//! resource-instance → resource → instance → object → server defaults.

use crate::path::Path;
use crate::request::WriteAttributes;
use crate::error::Result;

/// A merged attribute set. Unlike [`WriteAttributes`] this additionally
/// tracks whether `pmin`/`pmax` were filled from server defaults rather
/// than an explicit write, which callers use to decide whether to persist
/// them back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveAttributes {
    pub pmin: Option<u64>,
    pub pmax: Option<u64>,
    pub epmin: Option<u64>,
    pub epmax: Option<u64>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
    pub con: Option<bool>,
}

impl EffectiveAttributes {
    fn fill_from(&mut self, sparse: &WriteAttributes) {
        self.pmin = self.pmin.or(sparse.pmin);
        self.pmax = self.pmax.or(sparse.pmax);
        self.epmin = self.epmin.or(sparse.epmin);
        self.epmax = self.epmax.or(sparse.epmax);
        self.gt = self.gt.or(sparse.gt);
        self.lt = self.lt.or(sparse.lt);
        self.st = self.st.or(sparse.st);
        self.con = self.con.or(sparse.con);
    }
}

/// One level of the attribute inheritance chain: resource instance,
/// resource, object instance, object, or the server's own defaults.
/// Implementations back this with whatever persistence an embedding
/// application chooses (SPEC_FULL.md's "persistence backend" external
/// collaborator).
pub trait AttributeStore {
    fn resource_instance_attrs(&self, server_id: u16, path: &Path) -> Result<Option<WriteAttributes>>;
    fn resource_attrs(&self, server_id: u16, path: &Path) -> Result<Option<WriteAttributes>>;
    fn instance_attrs(&self, server_id: u16, path: &Path) -> Result<Option<WriteAttributes>>;
    fn object_attrs(&self, server_id: u16, object_id: u16) -> Result<Option<WriteAttributes>>;
    fn default_min_period(&self, server_id: u16) -> Result<Option<u64>>;
    fn default_max_period(&self, server_id: u16) -> Result<Option<u64>>;
}

/// Resolves the effective attributes for `path` under `server_id`.
/// Returns `None` if `path` has no object component — the root path
/// carries no attributes of its own.
pub fn resolve(
    store: &dyn AttributeStore,
    path: &Path,
    server_id: u16,
    with_server_defaults: bool,
) -> Result<Option<EffectiveAttributes>> {
    let Some(object_id) = path.object_id() else {
        return Ok(None);
    };

    let mut effective = EffectiveAttributes::default();

    if path.resource_instance_id().is_some() {
        if let Some(a) = store.resource_instance_attrs(server_id, path)? {
            effective.fill_from(&a);
        }
    }
    if path.resource_id().is_some() {
        if let Some(a) = store.resource_attrs(server_id, path)? {
            effective.fill_from(&a);
        }
    }
    if path.instance_id().is_some() {
        if let Some(a) = store.instance_attrs(server_id, path)? {
            effective.fill_from(&a);
        }
    }
    if let Some(a) = store.object_attrs(server_id, object_id)? {
        effective.fill_from(&a);
    }

    if with_server_defaults {
        if effective.pmin.is_none() {
            effective.pmin = store.default_min_period(server_id)?;
        }
        if effective.pmax.is_none() {
            effective.pmax = store.default_max_period(server_id)?;
        }
        if effective.pmin.is_none() {
            effective.pmin = Some(0);
        }
    }

    Ok(Some(effective))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeStore {
        by_path: HashMap<String, WriteAttributes>,
        object_defaults: HashMap<u16, WriteAttributes>,
        min_period: Option<u64>,
        max_period: Option<u64>,
    }

    impl AttributeStore for FakeStore {
        fn resource_instance_attrs(&self, _server_id: u16, path: &Path) -> Result<Option<WriteAttributes>> {
            Ok(self.by_path.get(&path.to_string()).cloned())
        }
        fn resource_attrs(&self, _server_id: u16, path: &Path) -> Result<Option<WriteAttributes>> {
            Ok(self.by_path.get(&path.to_string()).cloned())
        }
        fn instance_attrs(&self, _server_id: u16, path: &Path) -> Result<Option<WriteAttributes>> {
            Ok(self.by_path.get(&path.to_string()).cloned())
        }
        fn object_attrs(&self, _server_id: u16, object_id: u16) -> Result<Option<WriteAttributes>> {
            Ok(self.object_defaults.get(&object_id).cloned())
        }
        fn default_min_period(&self, _server_id: u16) -> Result<Option<u64>> {
            Ok(self.min_period)
        }
        fn default_max_period(&self, _server_id: u16) -> Result<Option<u64>> {
            Ok(self.max_period)
        }
    }

    #[test]
    fn resource_level_overrides_object_level() {
        let mut store = FakeStore::default();
        store.object_defaults.insert(
            3,
            WriteAttributes {
                pmin: Some(100),
                ..Default::default()
            },
        );
        let leaf = Path::from_slash_separated("/3/0/9").unwrap();
        store.by_path.insert(
            leaf.to_string(),
            WriteAttributes {
                pmin: Some(5),
                ..Default::default()
            },
        );
        let resolved = resolve(&store, &leaf, 1, false).unwrap().unwrap();
        assert_eq!(resolved.pmin, Some(5));
    }

    #[test]
    fn missing_min_period_defaults_to_zero_with_server_defaults() {
        let store = FakeStore::default();
        let leaf = Path::from_slash_separated("/3/0/9").unwrap();
        let resolved = resolve(&store, &leaf, 1, true).unwrap().unwrap();
        assert_eq!(resolved.pmin, Some(0));
    }

    #[test]
    fn no_resolution_without_object_component() {
        let store = FakeStore::default();
        assert_eq!(resolve(&store, &Path::ROOT, 1, true).unwrap(), None);
    }

    #[test]
    fn server_default_min_period_used_before_falling_back_to_zero() {
        let mut store = FakeStore::default();
        store.min_period = Some(30);
        let leaf = Path::from_slash_separated("/3/0/9").unwrap();
        let resolved = resolve(&store, &leaf, 1, true).unwrap().unwrap();
        assert_eq!(resolved.pmin, Some(30));
    }
}
