mod importer;
mod path;
mod weights;

pub use importer::{DEFAULT_SCOPE, WeightImporter};
pub use path::{BnRole, ParamScope};
pub use weights::{CLASSIFIER_BIASES, CLASSIFIER_WEIGHTS, PretrainedWeights, WeightTensor};
