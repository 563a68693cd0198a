pub mod aggregate;
pub mod config;
pub mod datasets;
pub mod error;
pub mod evaluation;
pub mod normalizer;
pub mod pipeline;
pub mod preprocess;
pub mod runner;

// Re-export commonly used types for convenience
pub use aggregate::{AggregateTable, ResultAggregator};
pub use config::{Config, Overrides};
pub use datasets::{DatasetFamily, Sequence, SequenceCatalog};
pub use error::{StageError, StageResult};
pub use evaluation::{MetricEvaluator, MetricKind, MetricResult};
pub use normalizer::TrajectoryNormalizer;
pub use pipeline::{BatchReport, BatchRunner, Collaborators};
pub use preprocess::{RunRoot, Variant, VariantKind, VariantPreprocessor};
pub use runner::{capture_artifact, VoRunner};
