pub mod artifacts;
pub mod features;
pub mod image;

pub use artifacts::{decode_inline_image, ArtifactStore, LocalArtifactStore};
pub use features::{
    AggregatorOptions, FeatureAggregator, FeatureInputs, InMemoryVelocityStore, IpRiskList,
    VelocityLookup,
};
pub use self::image::ImageQualityAnalyzer;
