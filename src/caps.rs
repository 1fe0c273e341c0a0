// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Regex capability negotiation.

use crate::device::{execute, Device};
use crate::error::RegexError;
use crate::layout::{query_hca_cap_in, query_hca_cap_out, QueryHcaCapIn, QueryHcaCapOut};
use crate::opcode::{Opcode, HCA_CAP_OP_MOD_GENERAL_DEVICE, HCA_CAP_OP_MOD_GET_CUR};

/// Regex capabilities reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Regex parameters can be set, i.e. the engines can be driven.
    pub supported: bool,
    /// Number of independent engines.
    pub engine_count: u8,
    /// Log2 of the engine control register space size.
    pub crspace_log2_size: u8,
    /// Version of the regex parameter interface.
    pub params_version: u8,
}

/// Query the current general device capabilities and decode the regex ones.
///
/// This does not judge the result; see [`query_capabilities`].
pub fn read_capabilities<D: Device + ?Sized>(device: &D) -> Result<DeviceCapabilities, RegexError> {
    let mut input = QueryHcaCapIn::new();
    input.set(query_hca_cap_in::OPCODE, Opcode::QueryHcaCap.as_u16() as u32);
    input.set(
        query_hca_cap_in::OP_MOD,
        (HCA_CAP_OP_MOD_GENERAL_DEVICE | HCA_CAP_OP_MOD_GET_CUR) as u32,
    );

    // 4 KiB of capabilities; keep it off the stack.
    let mut output = Box::new(QueryHcaCapOut::new());
    execute(device, Opcode::QueryHcaCap, &input, &mut *output)?;

    Ok(DeviceCapabilities {
        supported: output.get(query_hca_cap_out::REGEXP_PARAMS) != 0,
        engine_count: output.get(query_hca_cap_out::REGEXP_NUM_OF_ENGINES) as u8,
        crspace_log2_size: output.get(query_hca_cap_out::REGEXP_LOG_CRSPACE_SIZE) as u8,
        params_version: output.get(query_hca_cap_out::REGEXP_VERSION) as u8,
    })
}

/// Negotiate regex offload with a device.
///
/// # Errors
///
/// - [`RegexError::Command`] if the device rejects the query
/// - [`RegexError::Unsupported`] if regex offload is unavailable or the
///   device exposes no engines; this is the expected outcome for most
///   devices while probing
pub fn query_capabilities<D: Device + ?Sized>(
    device: &D,
) -> Result<DeviceCapabilities, RegexError> {
    let caps = read_capabilities(device)?;
    if !caps.supported || caps.engine_count == 0 {
        log::info!(
            "regex offload unavailable (params={}, engines={})",
            caps.supported,
            caps.engine_count
        );
        return Err(RegexError::Unsupported);
    }

    log::info!(
        "regex offload supported: {} engine(s), params version {}, crspace 2^{}",
        caps.engine_count,
        caps.params_version,
        caps.crspace_log2_size
    );
    Ok(caps)
}

/// Check whether a device offers regex offload.
///
/// Any failure, including a rejected query, counts as unsupported. Calling
/// this has no side effect on the device.
pub fn is_supported<D: Device + ?Sized>(device: &D) -> bool {
    query_capabilities(device).is_ok()
}
