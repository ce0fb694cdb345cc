// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

/// GPU residency of one CPU-authored resource (mesh buffers, a texture).
///
/// The payload stays with its owner in the scene; this only tracks the device
/// handle. Uploads happen on first use and at most once; releases hand the
/// handle to a deletion queue instead of destroying it.
#[derive(Debug)]
pub struct LazyResource<H> {
    handle: Option<H>,
    uploads: u32,
}

impl<H> Default for LazyResource<H> {
    fn default() -> Self {
        Self {
            handle: None,
            uploads: 0,
        }
    }
}

impl<H> LazyResource<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resident(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    /// Successful uploads so far. Stays at one unless the resource was released
    /// and referenced again.
    pub fn upload_count(&self) -> u32 {
        self.uploads
    }

    /// Returns whether the resource is usable this frame. `upload` runs only while
    /// not resident; it may return `Ok(None)` to defer, in which case the caller
    /// skips the resource and the next frame retries.
    pub fn ensure_resident(&mut self, upload: impl FnOnce() -> Result<Option<H>>) -> Result<bool> {
        if self.handle.is_some() {
            return Ok(true);
        }
        match upload()? {
            Some(handle) => {
                self.handle = Some(handle);
                self.uploads += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Gives the handle to `retire`, which is expected to enqueue its destruction.
    /// Returns false when nothing was resident.
    pub fn release(&mut self, retire: impl FnOnce(H)) -> bool {
        match self.handle.take() {
            Some(handle) => {
                retire(handle);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeletionQueue;

    #[test]
    fn uploads_once_then_short_circuits() {
        let mut res = LazyResource::new();
        let mut calls = 0;
        for _ in 0..3 {
            let ready = res
                .ensure_resident(|| {
                    calls += 1;
                    Ok(Some(7u32))
                })
                .unwrap();
            assert!(ready);
        }
        assert_eq!(calls, 1);
        assert_eq!(res.upload_count(), 1);
        assert_eq!(res.handle(), Some(&7));
    }

    #[test]
    fn deferred_upload_retries_next_time() {
        let mut res = LazyResource::<u32>::new();
        assert!(!res.ensure_resident(|| Ok(None)).unwrap());
        assert!(!res.is_resident());
        assert!(res.ensure_resident(|| Ok(Some(1))).unwrap());
    }

    #[test]
    fn upload_errors_propagate() {
        let mut res = LazyResource::<u32>::new();
        let err = res.ensure_resident(|| anyhow::bail!("out of device memory"));
        assert!(err.is_err());
        assert!(!res.is_resident());
    }

    #[test]
    fn release_goes_through_queue() {
        let mut res = LazyResource::new();
        res.ensure_resident(|| Ok(Some("mesh#0"))).unwrap();

        let mut queue = DeletionQueue::new();
        assert!(res.release(|h| queue.push(h)));
        assert!(!res.is_resident());
        assert_eq!(queue.len(), 1);
        assert!(!res.release(|h| queue.push(h)));
    }
}
