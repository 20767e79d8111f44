//! Test utilities shared by the format test modules

pub use choops_test_utils::{
    IffBuilder, h7a_block, h7a_literal_stream, hi_shoe1_builder, name_table_body,
    package_fixture, pattern,
};

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `data`, for content comparisons that print short diffs
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
