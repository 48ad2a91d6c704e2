// Rolling-stock loading seam.
//
// Building a train from a join or train-add means instantiating each car from
// its file reference. The physics and rendering side owns that work; the sync
// layer only needs to know which cars made it. `CarLoader` is the boundary:
// it may accept a car, substitute a different file, or refuse it.
//
// `load_consist` applies a loader to a whole car list. Refused cars are
// skipped with a warning (a peer with a slightly different trainset can
// still join); a train with no loadable cars at all is refused.

use std::path::{Path, PathBuf};

use log::warn;
use railsync_protocol::CarDescriptor;

use crate::error::CarLoadError;

/// Instantiates rolling stock from a file reference.
pub trait CarLoader: Send {
    /// Load one car, returning the descriptor actually used.
    fn load(&self, car: &CarDescriptor) -> Result<CarDescriptor, CarLoadError>;
}

/// Accepts every car unchanged. Used by headless nodes with no trainset.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllCars;

impl CarLoader for AcceptAllCars {
    fn load(&self, car: &CarDescriptor) -> Result<CarDescriptor, CarLoadError> {
        Ok(car.clone())
    }
}

/// Checks that each car's file exists under a trainset directory.
#[derive(Clone, Debug)]
pub struct TrainsetDirLoader {
    root: PathBuf,
}

impl TrainsetDirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a wire file reference (backslash-separated) under the root.
    pub fn resolve(&self, file: &str) -> PathBuf {
        file.split(['\\', '/'])
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CarLoader for TrainsetDirLoader {
    fn load(&self, car: &CarDescriptor) -> Result<CarDescriptor, CarLoadError> {
        let path = self.resolve(&car.file);
        if path.is_file() {
            Ok(car.clone())
        } else {
            Err(CarLoadError::Missing(path))
        }
    }
}

/// Load every car of a train, skipping the ones the loader refuses.
pub fn load_consist(
    loader: &dyn CarLoader,
    cars: &[CarDescriptor],
) -> Result<Vec<CarDescriptor>, CarLoadError> {
    let loaded: Vec<CarDescriptor> = cars
        .iter()
        .filter_map(|car| match loader.load(car) {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                warn!("skipping car {}: {e}", car.id);
                None
            }
        })
        .collect();
    if loaded.is_empty() {
        return Err(CarLoadError::EmptyTrain);
    }
    Ok(loaded)
}
