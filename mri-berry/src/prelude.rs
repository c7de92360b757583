//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::{Case, LabelRecord, Labels, PrepError, PrepResult, Sample};

pub use crate::consts::label::{BACKGROUND, EDEMA, ENHANCING, NECROSIS, NON_ENHANCING};
pub use crate::consts::{CLASS_DEPTH, FEATURES, LABELS, SPLIT_NAMES};

pub use crate::config::{PrepConfig, SinkKind, StageConfig};
pub use crate::dataset::{self, data_dir_from_env_or_home, CaseSource, DirSource};
pub use crate::pipeline::{Pipeline, Process};
pub use crate::reader::{NiftiReader, NpyReader, VolumeReader};
pub use crate::sink::{NpzSink, RecordSink, Sink, StoreSink};
pub use crate::stage::ops::{GeometricOp, OpRegistry};
pub use crate::stage::{
    from_fn, one_hot, Augment, AugmentMode, ChannelStats, Crop, Emit, LabelRule, Loader,
    Normalize, Policy, Scope, Stage,
};
pub use crate::store::{ChunkedStore, DType, DatasetSpec, Element, StoreReader};
