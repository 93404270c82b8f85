//! Kubernetes objects deployed onto the cluster and their archive packaging
//!
//! Objects are carried as canonical JSON rather than typed structs since the
//! cluster is only reached through `kubectl` on the remote side. Typed
//! `k8s_openapi` values are converted with [`Manifest::from_resource`].

pub mod external_dns;
pub mod nginx;

use std::io::{Cursor, Read, Write};

use serde::Serialize;
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use extdns_common::{Error, Result, DEFAULT_NAMESPACE};

/// Directory inside the archive that `kubectl apply -f` is pointed at
pub const MANIFEST_DIR: &str = "manifests";

/// A single declarative Kubernetes object
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    kind: String,
    name: String,
    namespace: Option<String>,
    value: Value,
}

impl Manifest {
    /// Wrap a JSON object, validating `apiVersion`, `kind` and `metadata.name`
    pub fn from_value(value: Value) -> Result<Self> {
        let str_at = |pointer: &str| {
            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let kind = str_at("/kind").ok_or_else(|| Error::serialization("object has no kind"))?;
        let name = str_at("/metadata/name")
            .ok_or_else(|| Error::serialization_for(&kind, "<unnamed>", "object has no metadata.name"))?;
        if str_at("/apiVersion").is_none() {
            return Err(Error::serialization_for(&kind, &name, "object has no apiVersion"));
        }
        let namespace = str_at("/metadata/namespace");

        Ok(Self {
            kind,
            name,
            namespace,
            value,
        })
    }

    /// Convert a typed Kubernetes resource, filling in `apiVersion` and `kind`
    pub fn from_resource<K>(resource: &K) -> Result<Self>
    where
        K: k8s_openapi::Resource + Serialize,
    {
        let mut value = serde_json::to_value(resource)
            .map_err(|e| Error::serialization_for(K::KIND, "<unknown>", e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("apiVersion".to_string(), Value::from(K::API_VERSION));
            obj.insert("kind".to_string(), Value::from(K::KIND));
        }
        Self::from_value(value)
    }

    /// Object kind (e.g. "Deployment")
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, `None` for cluster-scoped objects or unset namespaces
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Namespace to address the object in, defaulting to `default`
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The object as JSON
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.value)
            .map_err(|e| Error::serialization_for(&self.kind, &self.name, e.to_string()))
    }
}

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::serialization(format!("zip archive: {}", e))
}

/// Package objects into a zip archive with one `manifests/{i}.json` entry per
/// object, in input order
pub fn package_manifests(manifests: &[Manifest]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (i, manifest) in manifests.iter().enumerate() {
        let json = manifest.to_json()?;
        writer
            .start_file(format!("{}/{}.json", MANIFEST_DIR, i), options)
            .map_err(zip_err)?;
        writer
            .write_all(&json)
            .map_err(|e| Error::io(format!("writing {}/{}", manifest.kind, manifest.name), e))?;
    }

    Ok(writer.finish().map_err(zip_err)?.into_inner())
}

/// Read back an archive produced by [`package_manifests`], in entry index order
pub fn unpack_manifests(archive: &[u8]) -> Result<Vec<Manifest>> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(zip_err)?;
    let mut manifests = Vec::with_capacity(zip.len());

    for i in 0..zip.len() {
        let expected = format!("{}/{}.json", MANIFEST_DIR, i);
        let mut entry = zip.by_name(&expected).map_err(zip_err)?;
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|e| Error::io(format!("reading {}", expected), e))?;

        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::serialization(format!("{}: {}", expected, e)))?;
        manifests.push(Manifest::from_value(value)?);
    }

    Ok(manifests)
}
