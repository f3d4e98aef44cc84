//! Filehandle-to-name cache fed by watching name-granting procedures.
//!
//! A LOOKUP/CREATE style call names an object relative to a parent
//! filehandle; the matching reply carries the object's filehandle. Staging
//! the (parent, name) pair keyed by RPC xid at call time and binding it to
//! the filehandle at reply time lets later packets display a path for a
//! handle that is otherwise an opaque blob.

use std::collections::HashMap;

/// Recursion ceiling when assembling a full path from parent links.
/// Handles can form cycles when a server reuses them, so the walk is
/// depth-capped rather than trusted to terminate.
const MAX_PATH_DEPTH: usize = 100;

#[derive(Debug)]
struct PendingName {
    parent: Option<Vec<u8>>,
    name: String,
}

#[derive(Debug)]
struct SnoopEntry {
    name: String,
    parent: Option<Vec<u8>>,
    /// Memoized full path and whether the walk hit the depth cap.
    full: Option<(String, bool)>,
}

/// Canonical map key for a filehandle: length word followed by the bytes
/// padded to a 4-byte multiple, so equal handles of different capture
/// lengths never alias.
fn fh_key(fh: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + fh.len() + 3);
    key.extend_from_slice(&(fh.len() as u32).to_be_bytes());
    key.extend_from_slice(fh);
    while key.len() % 4 != 0 {
        key.push(0);
    }
    key
}

#[derive(Debug, Default)]
pub struct SnoopCache {
    pending: HashMap<u32, PendingName>,
    resolved: HashMap<Vec<u8>, SnoopEntry>,
}

impl SnoopCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the (parent, name) carried by a call. Staging only happens on
    /// the first pass over a frame; revisits would re-stage names already
    /// consumed by the reply. A retransmitted xid replaces the earlier
    /// staging so the reply binds to the latest call contents.
    pub fn stage(&mut self, xid: u32, parent: Option<&[u8]>, name: &str, first_pass: bool) {
        if !first_pass || name.is_empty() || name == "." || name == ".." {
            return;
        }
        self.pending.insert(
            xid,
            PendingName {
                parent: parent.map(|p| p.to_vec()),
                name: name.to_string(),
            },
        );
    }

    /// Bind the staged name for `xid` to the filehandle from the reply.
    /// Idempotent: a handle that already has a name keeps it, so replayed
    /// passes and duplicate replies never flap the cache.
    pub fn resolve(&mut self, xid: u32, fh: &[u8], first_pass: bool) {
        if !first_pass {
            return;
        }
        let staged = match self.pending.remove(&xid) {
            Some(p) => p,
            None => return,
        };
        let key = fh_key(fh);
        self.resolved.entry(key).or_insert(SnoopEntry {
            name: staged.name,
            parent: staged.parent.map(|p| fh_key(&p)),
            full: None,
        });
    }

    /// Name a handle received without a staged call, e.g. the root handle
    /// from a mount. Same first-writer-wins rule as [`resolve`](Self::resolve).
    pub fn bind_name(&mut self, fh: &[u8], name: &str) {
        self.resolved.entry(fh_key(fh)).or_insert(SnoopEntry {
            name: name.to_string(),
            parent: None,
            full: None,
        });
    }

    /// The leaf name bound to `fh`, if any.
    pub fn name_for(&self, fh: &[u8]) -> Option<&str> {
        self.resolved.get(&fh_key(fh)).map(|e| e.name.as_str())
    }

    /// Full path for `fh` assembled by walking parent links, plus a flag
    /// telling whether the walk was cut off at the depth cap. Results are
    /// memoized per handle.
    pub fn full_name(&mut self, fh: &[u8]) -> Option<(String, bool)> {
        let key = fh_key(fh);
        if let Some(full) = self.resolved.get(&key).and_then(|e| e.full.clone()) {
            return Some(full);
        }
        self.resolved.get(&key)?;

        let mut components: Vec<&str> = Vec::new();
        let mut cursor = Some(&key);
        let mut truncated = false;
        for depth in 0.. {
            let k = match cursor {
                Some(k) => k,
                None => break,
            };
            let entry = match self.resolved.get(k) {
                Some(e) => e,
                None => break,
            };
            if depth >= MAX_PATH_DEPTH {
                truncated = true;
                break;
            }
            components.push(entry.name.as_str());
            cursor = entry.parent.as_ref();
        }
        components.reverse();
        // a root bound as "/" already carries its separator
        let mut path = String::new();
        for name in components {
            if !path.is_empty() && !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(name);
        }

        let full = (path, truncated);
        if let Some(entry) = self.resolved.get_mut(&key) {
            entry.full = Some(full.clone());
        }
        Some(full)
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
