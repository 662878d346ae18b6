//! Resource store (spec.md §5): buffers, textures, and atomic counters as
//! host-owned backing arrays, with the resize/clear discipline and atomic
//! RMW semantics spec.md §5/§8 pin down exactly.
//!
//! Grounded on the teacher's `data.rs::State` (a generalized host-side
//! store of named mutable cells) with genuinely new atomic-cell semantics,
//! since the teacher's dashboard state has no RMW concept.

use std::collections::HashMap;

use thiserror::Error;

use crate::document::{Document, Persistence, Resource, ResourceKind, ResourceSize, Sampler};
use crate::value::Value;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("Runtime Error: buffer_load OOB")]
    BufferLoadOob,
    #[error("Runtime Error: buffer_store OOB")]
    BufferStoreOob,
    #[error("resource '{0}' not found")]
    NotFound(String),
    #[error("cmd_copy_buffer requires matching element type and size")]
    CopyMismatch,
}

/// An atomic cell: a sequentially-consistent `int`, per spec.md §5.2.
/// `std::sync::atomic::AtomicI64` gives us the ordering for free even
/// though the reference host's dispatch loop (`runtime.rs`) runs thread
/// ids sequentially rather than on real concurrent hardware threads —
/// a future backend that does dispatch threads concurrently gets correct
/// RMW ordering for free.
#[derive(Debug, Default)]
pub struct AtomicCell(std::sync::atomic::AtomicI64);

impl Clone for AtomicCell {
    fn clone(&self) -> Self {
        AtomicCell(std::sync::atomic::AtomicI64::new(self.0.load(std::sync::atomic::Ordering::SeqCst)))
    }
}

impl AtomicCell {
    pub fn load(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn store(&self, v: i64) {
        self.0.store(v, std::sync::atomic::Ordering::SeqCst)
    }

    /// Returns the value strictly before the modification (spec.md §5.2,
    /// §8 scenario 5).
    pub fn rmw(&self, f: impl Fn(i64) -> i64) -> i64 {
        self.0.fetch_update(std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst, |old| Some(f(old)))
            .expect("fetch_update closure always returns Some")
    }
}

#[derive(Debug)]
pub enum Backing {
    Buffer(Vec<Value>),
    Texture2d { width: u32, height: u32, texels: Vec<Value> },
    AtomicCounter(Vec<AtomicCell>),
}

#[derive(Debug)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub element_type: Option<String>,
    pub persistence: Persistence,
    pub sampler: Option<Sampler>,
    pub backing: Backing,
}

impl ResourceState {
    pub fn buffer_len(&self) -> usize {
        match &self.backing {
            Backing::Buffer(v) => v.len(),
            Backing::AtomicCounter(v) => v.len(),
            Backing::Texture2d { width, height, .. } => (*width as usize) * (*height as usize),
        }
    }

    pub fn buffer_load(&self, index: i64) -> Result<Value, ResourceError> {
        let v = match &self.backing {
            Backing::Buffer(cells) => cells.get(index as usize).cloned(),
            Backing::AtomicCounter(cells) => cells.get(index as usize).map(|c| Value::Int(c.load())),
            Backing::Texture2d { texels, .. } => texels.get(index as usize).cloned(),
        };
        v.ok_or(ResourceError::BufferLoadOob)
    }

    pub fn buffer_store(&mut self, index: i64, value: Value) -> Result<(), ResourceError> {
        match &mut self.backing {
            Backing::Buffer(cells) => {
                let slot = cells.get_mut(index as usize).ok_or(ResourceError::BufferStoreOob)?;
                *slot = value;
                Ok(())
            }
            Backing::AtomicCounter(cells) => {
                let slot = cells.get(index as usize).ok_or(ResourceError::BufferStoreOob)?;
                slot.store(value.as_i64().unwrap_or(0));
                Ok(())
            }
            Backing::Texture2d { texels, .. } => {
                let slot = texels.get_mut(index as usize).ok_or(ResourceError::BufferStoreOob)?;
                *slot = value;
                Ok(())
            }
        }
    }

    pub fn atomic_cell(&self, index: i64) -> Result<&AtomicCell, ResourceError> {
        match &self.backing {
            Backing::AtomicCounter(cells) => cells.get(index as usize).ok_or(ResourceError::BufferLoadOob),
            _ => Err(ResourceError::NotFound("not an atomic_counter".to_string())),
        }
    }

    /// Resize a buffer/counter to `new_len` elements, honoring
    /// `clearOnResize` (spec.md §5.1, §8 scenario 6): zero-fill entirely
    /// when true, else preserve the `0..min(old,new)` prefix.
    pub fn resize(&mut self, new_len: usize, zero_value: Value) {
        let clear = self.persistence.clear_on_resize;
        match &mut self.backing {
            Backing::Buffer(cells) => resize_vec(cells, new_len, clear, zero_value),
            Backing::Texture2d { texels, width, height } => {
                resize_vec(texels, new_len, clear, zero_value);
                // callers pass new_len = new_width * new_height; width/height
                // themselves are updated by the caller which knows the 2D shape.
                let _ = (width, height);
            }
            Backing::AtomicCounter(cells) => {
                let old_len = cells.len();
                if clear {
                    cells.clear();
                    cells.resize_with(new_len, AtomicCell::default);
                } else if new_len >= old_len {
                    cells.resize_with(new_len, AtomicCell::default);
                } else {
                    cells.truncate(new_len);
                }
            }
        }
    }
}

fn resize_vec(cells: &mut Vec<Value>, new_len: usize, clear: bool, zero_value: Value) {
    if clear {
        *cells = vec![zero_value; new_len];
    } else if new_len >= cells.len() {
        cells.resize(new_len, zero_value);
    } else {
        cells.truncate(new_len);
    }
}

pub struct ResourceStore {
    resources: HashMap<String, ResourceState>,
}

impl ResourceStore {
    pub fn new() -> Self {
        ResourceStore { resources: HashMap::new() }
    }

    pub fn insert(&mut self, id: impl Into<String>, state: ResourceState) {
        self.resources.insert(id.into(), state);
    }

    pub fn get(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ResourceState> {
        self.resources.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.resources.keys()
    }

    /// `cmd_resize_resource` (spec.md §5.1): grow/shrink a buffer/counter,
    /// or a texture given an explicit `[w, h]`.
    pub fn resize(&mut self, id: &str, size: ResourceSize, zero_value: Value) -> Result<(), ResourceError> {
        let res = self.resources.get_mut(id).ok_or_else(|| ResourceError::NotFound(id.to_string()))?;
        match (&mut res.backing, size) {
            (Backing::Texture2d { width, height, .. }, ResourceSize::Fixed2(w, h)) => {
                let new_len = (w as usize) * (h as usize);
                res.resize(new_len, zero_value);
                if let Backing::Texture2d { width: rw, height: rh, .. } = &mut res.backing {
                    *rw = w;
                    *rh = h;
                }
                let _ = (width, height);
                Ok(())
            }
            (_, ResourceSize::Fixed(n)) => {
                res.resize(n as usize, zero_value);
                Ok(())
            }
            _ => Err(ResourceError::NotFound(format!("{id}: incompatible resize shape"))),
        }
    }

    /// `cmd_copy_buffer` (spec.md §5.3): element-for-element copy between
    /// resources of identical element type and size.
    pub fn copy(&mut self, src_id: &str, dst_id: &str) -> Result<(), ResourceError> {
        let src_values: Vec<Value> = {
            let src = self.resources.get(src_id).ok_or_else(|| ResourceError::NotFound(src_id.to_string()))?;
            (0..src.buffer_len() as i64).map(|i| src.buffer_load(i).unwrap()).collect()
        };
        let dst = self.resources.get_mut(dst_id).ok_or_else(|| ResourceError::NotFound(dst_id.to_string()))?;
        if dst.buffer_len() != src_values.len() {
            return Err(ResourceError::CopyMismatch);
        }
        for (i, v) in src_values.into_iter().enumerate() {
            dst.buffer_store(i as i64, v)?;
        }
        Ok(())
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the initial store from a document's resource declarations
/// (spec.md §3): a `Texture2d`/`Fixed`-sized viewport resource starts at its
/// declared size (`TracksViewport` starts empty; the host resizes it once it
/// knows the output dimensions), every element zeroed unless `clearValue`
/// names a scalar to broadcast across every element.
pub fn build_from_document(doc: &Document) -> Result<ResourceStore, ResourceError> {
    let mut store = ResourceStore::new();
    for res in &doc.resources {
        store.insert(res.id.clone(), build_resource(res)?);
    }
    Ok(store)
}

fn build_resource(res: &Resource) -> Result<ResourceState, ResourceError> {
    let elem_ty = res
        .element_type
        .as_deref()
        .map(crate::types::parse_type_name)
        .unwrap_or(crate::types::ValueType::Float);
    let zero = res.clear_value.as_ref().map(json_scalar_to_zero).unwrap_or_else(|| Value::zero_of(&elem_ty));

    let backing = match res.kind {
        ResourceKind::Buffer => {
            let len = match res.size {
                ResourceSize::Fixed(n) => n as usize,
                ResourceSize::TracksViewport => 0,
                ResourceSize::Fixed2(w, h) => (w * h) as usize,
            };
            Backing::Buffer(vec![zero; len])
        }
        ResourceKind::Texture2d => {
            let (w, h) = match res.size {
                ResourceSize::Fixed2(w, h) => (w, h),
                ResourceSize::Fixed(n) => (n, 1),
                ResourceSize::TracksViewport => (0, 0),
            };
            Backing::Texture2d { width: w, height: h, texels: vec![zero; (w as usize) * (h as usize)] }
        }
        ResourceKind::AtomicCounter => {
            let len = match res.size {
                ResourceSize::Fixed(n) => n as usize,
                ResourceSize::TracksViewport => 0,
                ResourceSize::Fixed2(w, h) => (w * h) as usize,
            };
            let cells = (0..len).map(|_| AtomicCell::default()).collect::<Vec<_>>();
            for (cell, v) in cells.iter().zip(std::iter::repeat(zero.as_i64().unwrap_or(0))) {
                cell.store(v);
            }
            Backing::AtomicCounter(cells)
        }
    };

    Ok(ResourceState {
        kind: res.kind,
        element_type: res.element_type.clone(),
        persistence: res.persistence,
        sampler: res.sampler,
        backing,
    })
}

fn json_scalar_to_zero(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Value::Int(n.as_i64().unwrap_or(0)),
        serde_json::Value::Number(n) => Value::Float(n.as_f64().unwrap_or(0.0)),
        _ => Value::Float(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Persistence;

    fn buffer(len: usize, clear_on_resize: bool) -> ResourceState {
        ResourceState {
            kind: ResourceKind::Buffer,
            element_type: Some("int".to_string()),
            persistence: Persistence { clear_on_resize, ..Persistence::default() },
            sampler: None,
            backing: Backing::Buffer(vec![Value::Int(0); len]),
        }
    }

    #[test]
    fn atomic_rmw_returns_pre_modification_value() {
        let cell = AtomicCell::default();
        cell.store(5);
        let old = cell.rmw(|v| v + 1);
        assert_eq!(old, 5);
        assert_eq!(cell.load(), 6);
    }

    #[test]
    fn resize_without_clear_preserves_overlap() {
        let mut res = buffer(2, false);
        res.buffer_store(0, Value::Int(7)).unwrap();
        res.buffer_store(1, Value::Int(9)).unwrap();
        res.resize(4, Value::Int(0));
        assert_eq!(res.buffer_load(0).unwrap(), Value::Int(7));
        assert_eq!(res.buffer_load(1).unwrap(), Value::Int(9));
        assert_eq!(res.buffer_load(2).unwrap(), Value::Int(0));
    }

    #[test]
    fn resize_with_clear_zeroes_everything() {
        let mut res = buffer(2, true);
        res.buffer_store(0, Value::Int(7)).unwrap();
        res.resize(4, Value::Int(0));
        assert_eq!(res.buffer_load(0).unwrap(), Value::Int(0));
    }

    #[test]
    fn out_of_bounds_load_is_runtime_error() {
        let res = buffer(1, false);
        assert_eq!(res.buffer_load(5), Err(ResourceError::BufferLoadOob));
    }

    #[test]
    fn copy_buffer_requires_matching_size() {
        let mut store = ResourceStore::new();
        store.insert("a", buffer(2, false));
        store.insert("b", buffer(3, false));
        assert_eq!(store.copy("a", "b"), Err(ResourceError::CopyMismatch));
    }

    #[test]
    fn build_from_document_sizes_buffers_and_zeroes_them() {
        let doc = crate::document::Document::from_json_str(
            r#"{"version":"1","entryPoint":"main","resources":[
                {"id":"b","kind":"buffer","elementType":"int","size":4}
            ],"structs":[],"functions":[{"id":"main","kind":"cpu","inputs":[],"outputs":[],"nodes":[]}]}"#,
        )
        .unwrap();
        let store = build_from_document(&doc).unwrap();
        let b = store.get("b").unwrap();
        assert_eq!(b.buffer_len(), 4);
        assert_eq!(b.buffer_load(0).unwrap(), Value::Int(0));
    }

    #[test]
    fn copy_buffer_transfers_values() {
        let mut store = ResourceStore::new();
        let mut src = buffer(2, false);
        src.buffer_store(0, Value::Int(1)).unwrap();
        src.buffer_store(1, Value::Int(2)).unwrap();
        store.insert("a", src);
        store.insert("b", buffer(2, false));
        store.copy("a", "b").unwrap();
        assert_eq!(store.get("b").unwrap().buffer_load(1).unwrap(), Value::Int(2));
    }
}
