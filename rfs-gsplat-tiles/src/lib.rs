// Tiled 3D Gaussian Splatting orchestration core
// CPU side of a streamed splat primitive: tile aggregation, async depth-sort
// scheduling, per-splat selection/lock/color-group state and selection outlines.
// Rendering, tile streaming and GPU resources live in the host.

pub mod boundary;
pub mod color_filter;
pub mod config;
pub mod encoder;
pub mod error;
pub mod outline;
pub mod picking;
pub mod primitive;
pub mod radix_sort;
pub mod services;
pub mod sort_scheduler;
pub mod splat_set;
pub mod splat_state;
pub mod task;
pub mod tile_aggregator;

// Re-exports
pub use boundary::{compute_boundary, BoundaryClusterer, BoundaryParameterUpdate, BoundaryParameters, BoundaryStats};
pub use color_filter::{ColorFilter, ColorFilterPipeline, ColorModifications, ColorOverride, FilterContext, FilterId, FilterResult};
pub use config::PrimitiveConfig;
pub use encoder::{encode_splats, CpuSplatEncoder};
pub use error::{AggregationError, EncodingError, PrimitiveError, ServiceError, SortError, ValidationError};
pub use outline::{OutlineMode, OutlineParams, OutlineSettings};
pub use picking::{pick_splat, PickOptions, ScreenProjector, SplatInfo, ViewProjectionProjector};
pub use primitive::{FrameInput, FrameOutput, FrameStage, GaussianSplatPrimitive};
pub use radix_sort::{sort_by_depth, CpuDepthSorter};
pub use services::{DepthSortService, EncodeRequest, EncodedSplats, SortRequest, SplatEncodingService};
pub use sort_scheduler::{SortScheduler, SortStats, SortedOrder, SortingState};
pub use splat_set::{ColorLayout, IdMapping, SplatSet, TileId, TileIdRange, TileSplats};
pub use splat_state::{state_bits, ColorGroupId, ColorGroupPalette, MutationReport, SelectionSets, SplatIndex, SplatState, SplatStateTable};
pub use task::{task_channel, Task, TaskCompleter};
pub use tile_aggregator::{aggregate, TileAggregator};
