mod digest_info;
pub mod recovery;

pub use digest_info::{digest_info_prefix, encode_digest_info, prepare_digest};
pub use recovery::{RecoveryFailure, RecoveryHost, RecoveryPhase, RecoveryProtocol};
