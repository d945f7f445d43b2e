use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    thread::JoinHandle,
};

use crossbeam_channel::{Receiver, Sender};
use crate::{Mesh, MeshData};

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed mesh: {0}")]
    Malformed(String),
    #[error("mesh has no triangles")]
    Empty,
}

/// Reads mesh data from a file. Runs on the import thread.
pub trait MeshLoader: Send + 'static {
    fn load(&mut self, path: &Path) -> Result<MeshData, ImportError>;
}

impl<F> MeshLoader for F
where
    F: FnMut(&Path) -> Result<MeshData, ImportError> + Send + 'static,
{
    fn load(&mut self, path: &Path) -> Result<MeshData, ImportError> {
        self(path)
    }
}

/// A mesh that finished importing.
#[derive(Debug, Clone)]
pub struct Imported {
    pub path: PathBuf,
    pub mesh: Arc<Mesh>,
}

/// Loads meshes on a background thread.
///
/// Requests are handled in order. Failed imports are logged and produce nothing.
/// Dropping the queue finishes the outstanding requests and joins the thread.
pub struct ImportQueue {
    requests: Option<Sender<PathBuf>>,
    results: Receiver<Imported>,
    worker: Option<JoinHandle<()>>,
}

impl ImportQueue {
    pub fn new(loader: impl MeshLoader) -> io::Result<Self> {
        let (request_sender, request_receiver) = crossbeam_channel::unbounded::<PathBuf>();
        let (result_sender, result_receiver) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("Scoria Mesh Import".to_string())
            .spawn(move || run_imports(loader, request_receiver, result_sender))?;
        Ok(Self {
            requests: Some(request_sender),
            results: result_receiver,
            worker: Some(worker),
        })
    }

    /// Queues `path` for import. Returns false if the import thread has exited.
    pub fn request(&self, path: impl Into<PathBuf>) -> bool {
        let Some(requests) = &self.requests else {
            return false;
        };
        requests.send(path.into()).is_ok()
    }

    /// Meshes imported since the last poll. Never blocks.
    pub fn poll(&self) -> Vec<Imported> {
        self.results.try_iter().collect()
    }
}

impl Drop for ImportQueue {
    fn drop(&mut self) {
        // Disconnecting the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("mesh import thread panicked");
            }
        }
    }
}

fn run_imports(mut loader: impl MeshLoader, requests: Receiver<PathBuf>, results: Sender<Imported>) {
    for path in requests.iter() {
        tracing::debug!(path = %path.display(), "importing mesh");
        let data = loader.load(&path).and_then(|mut data| {
            data.validate()?;
            if data.normals.is_empty() {
                data.recompute_normals();
            }
            if data.tangents.is_empty() {
                data.recompute_tangents();
            }
            Ok(data)
        });
        match data {
            Ok(data) => {
                tracing::info!(
                    path = %path.display(),
                    vertices = data.vertex_count(),
                    triangles = data.triangle_count(),
                    "imported mesh"
                );
                let mesh = Arc::new(Mesh::new(data));
                if results.send(Imported { path, mesh }).is_err() {
                    break;
                }
            }
            Err(error) => tracing::warn!(path = %path.display(), %error, "mesh import failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use glam::Vec3;
    use scoria::MeshSource;

    use super::*;

    fn poll_until(queue: &ImportQueue, count: usize) -> Vec<Imported> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut imported = Vec::new();
        while imported.len() < count && Instant::now() < deadline {
            imported.extend(queue.poll());
            std::thread::sleep(Duration::from_millis(1));
        }
        imported
    }

    fn loader(path: &Path) -> Result<MeshData, ImportError> {
        match path.to_str() {
            Some("cube") => Ok(MeshData::cube(1.0)),
            Some("bare") => Ok(MeshData {
                positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                indices: vec![0, 1, 2],
                ..Default::default()
            }),
            Some("broken") => Ok(MeshData {
                positions: vec![Vec3::ZERO],
                indices: vec![0, 1, 2],
                ..Default::default()
            }),
            _ => Err(io::Error::from(io::ErrorKind::NotFound).into()),
        }
    }

    #[test]
    fn test_imports_in_background() {
        let queue = ImportQueue::new(loader).unwrap();
        assert!(queue.request("cube"));
        let imported = poll_until(&queue, 1);
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].path, PathBuf::from("cube"));
        imported[0].mesh.read(|view| assert_eq!(view.vertex_count(), 24));
    }

    #[test]
    fn test_fills_in_missing_normals() {
        let queue = ImportQueue::new(loader).unwrap();
        queue.request("bare");
        let imported = poll_until(&queue, 1);
        let data = imported[0].mesh.snapshot();
        assert_eq!(data.normals, vec![Vec3::Z; 3]);
        assert_eq!(data.tangents.len(), 3);
    }

    #[test]
    fn test_failures_yield_nothing() {
        let queue = ImportQueue::new(loader).unwrap();
        queue.request("missing");
        queue.request("broken");
        queue.request("cube");
        // Requests run in order, so once the cube arrives the failures are done.
        let imported = poll_until(&queue, 1);
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].path, PathBuf::from("cube"));
        assert!(queue.poll().is_empty());
    }

    #[test]
    fn test_drop_joins_worker() {
        let queue = ImportQueue::new(|_: &Path| Ok::<_, ImportError>(MeshData::cube(1.0))).unwrap();
        for _ in 0..4 {
            queue.request("cube");
        }
        drop(queue);
    }
}
