pub mod classifier;
pub mod coordinator;
pub mod extract;
pub mod fetcher;
pub mod filter;
pub mod lane;
pub mod sink;
pub mod source;
pub mod workers;

pub use classifier::Classifier;
pub use coordinator::{PipelineCoordinator, RunReport};
pub use extract::{Extracted, PlainTextExtractor, RoutingExtractor, TextExtractor, TikaExtractor};
pub use fetcher::{local_name, Fetcher};
pub use filter::{ExclusionRule, PathFilter};
pub use lane::{Lane, LaneQueue, LaneSnapshot, LaneStats, PushError, Submission};
pub use sink::{JsonlSink, LogSink, ResultSink};
pub use source::{EntryStream, FsRemoteSource, ListOptions, RemoteSource};
pub use workers::{DocumentWorker, ImageWorker, LaneWorker, Outcome};
