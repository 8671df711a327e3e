//! Multi-resolution intensity-based registration.
//!
//! Histograms, similarity metrics (SSD, NMI, MI), a hill-climbing optimizer
//! and the coarse-to-fine driver that ties them to the transformations of
//! `regtk-core`.

pub mod error;
pub mod config;
pub mod validation;
pub mod progress;
pub mod histogram;
pub mod session;
pub mod metric;
pub mod optimizer;
pub mod registration;
pub mod multires;

pub use error::{RegistrationError, Result};
pub use config::{LevelParameters, RegistrationConfig, SimilarityMeasure};
pub use histogram::{Histogram1D, Histogram2D};
pub use metric::{create_metric, Metric, MutualInformation, NormalizedMutualInformation, SumOfSquaredDifferences};
pub use optimizer::{ConvergenceReason, GradientDescent, Optimizer};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use registration::{LevelReport, Registration};
pub use session::RegistrationSession;
pub use multires::{MultiResolutionRegistration, RegistrationReport, RegistrationState};
