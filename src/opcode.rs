// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! DevX command opcodes.
//!
//! These opcodes are defined in the mlx5 Programmer's Reference Manual and
//! are placed in the 16-bit `opcode` field at the start of every command
//! input buffer.

/// DevX command opcodes used by the regex control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Query HCA capabilities.
    QueryHcaCap = 0x0100,

    /// Create a memory key.
    CreateMkey = 0x0200,

    /// Destroy a memory key.
    DestroyMkey = 0x0202,

    /// Set per-engine regex parameters (database binding, engine stop).
    SetRegexParams = 0x0b04,

    /// Query per-engine regex parameters.
    QueryRegexParams = 0x0b05,

    /// Write an engine register.
    SetRegexRegisters = 0x0b06,

    /// Read an engine register.
    QueryRegexRegisters = 0x0b07,
}

impl Opcode {
    /// Returns the opcode as a u16 value.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the opcode matching a raw value, if known.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0100 => Some(Self::QueryHcaCap),
            0x0200 => Some(Self::CreateMkey),
            0x0202 => Some(Self::DestroyMkey),
            0x0b04 => Some(Self::SetRegexParams),
            0x0b05 => Some(Self::QueryRegexParams),
            0x0b06 => Some(Self::SetRegexRegisters),
            0x0b07 => Some(Self::QueryRegexRegisters),
            _ => None,
        }
    }

    /// Returns a human-readable name for the opcode.
    pub const fn name(self) -> &'static str {
        match self {
            Self::QueryHcaCap => "QUERY_HCA_CAP",
            Self::CreateMkey => "CREATE_MKEY",
            Self::DestroyMkey => "DESTROY_MKEY",
            Self::SetRegexParams => "SET_REGEX_PARAMS",
            Self::QueryRegexParams => "QUERY_REGEX_PARAMS",
            Self::SetRegexRegisters => "SET_REGEX_REGISTERS",
            Self::QueryRegexRegisters => "QUERY_REGEX_REGISTERS",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#06x})", self.name(), self.as_u16())
    }
}

/// `op_mod` for QUERY_HCA_CAP: general device capabilities.
pub const HCA_CAP_OP_MOD_GENERAL_DEVICE: u16 = 0x0 << 1;

/// `op_mod` for QUERY_HCA_CAP: current (not maximum) values.
pub const HCA_CAP_OP_MOD_GET_CUR: u16 = 0x1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::QueryHcaCap.as_u16(), 0x100);
        assert_eq!(Opcode::CreateMkey.as_u16(), 0x200);
        assert_eq!(Opcode::SetRegexParams.as_u16(), 0xb04);
        assert_eq!(Opcode::QueryRegexParams.as_u16(), 0xb05);
        assert_eq!(Opcode::SetRegexRegisters.as_u16(), 0xb06);
        assert_eq!(Opcode::QueryRegexRegisters.as_u16(), 0xb07);
    }

    #[test]
    fn test_opcode_from_raw() {
        assert_eq!(Opcode::from_u16(0xb04), Some(Opcode::SetRegexParams));
        assert_eq!(Opcode::from_u16(0x0202), Some(Opcode::DestroyMkey));
        assert_eq!(Opcode::from_u16(0xdead), None);
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(format!("{}", Opcode::QueryHcaCap), "QUERY_HCA_CAP (0x0100)");
        assert_eq!(
            format!("{}", Opcode::SetRegexParams),
            "SET_REGEX_PARAMS (0x0b04)"
        );
    }

    #[test]
    fn test_query_current_general_caps_op_mod() {
        assert_eq!(HCA_CAP_OP_MOD_GENERAL_DEVICE | HCA_CAP_OP_MOD_GET_CUR, 1);
    }
}
