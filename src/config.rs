// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Bring-up configuration.

use crate::device::Access;
use crate::error::RegexError;

/// Size of the database allocated per engine (128 MiB).
pub const DEFAULT_DATABASE_SIZE: usize = 1 << 27;

/// Huge page size backing the databases (2 MiB).
pub const DEFAULT_PAGE_SIZE: usize = 1 << 21;

/// How database memory is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Pre-reserved huge pages (`MAP_HUGETLB | MAP_POPULATE`).
    HugeTlb,
    /// Regular anonymous pages.
    Standard,
}

impl Backing {
    /// Operator hint appended to allocation failures.
    pub(crate) fn hint(&self) -> &'static str {
        match self {
            Self::HugeTlb => {
                "; ensure huge pages are reserved (see /proc/meminfo, \
                 echo NUM_PAGES > /proc/sys/vm/nr_hugepages)"
            }
            Self::Standard => "",
        }
    }
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HugeTlb => f.write_str("huge-page"),
            Self::Standard => f.write_str("anonymous"),
        }
    }
}

/// Parameters for bringing up the engines of one device.
#[derive(Debug, Clone)]
pub struct RegexConfig {
    database_size: usize,
    page_size: usize,
    access: Access,
    backing: Backing,
}

impl RegexConfig {
    /// Create a configuration with the production defaults.
    pub fn new() -> Self {
        Self {
            database_size: DEFAULT_DATABASE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            access: Access::LOCAL_WRITE | Access::REMOTE_WRITE | Access::REMOTE_READ,
            backing: Backing::HugeTlb,
        }
    }

    /// Set the per-engine database size in bytes.
    pub fn database_size(mut self, size: usize) -> Self {
        self.database_size = size;
        self
    }

    /// Set the page size used for alignment and address translation.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Set the access rights requested when registering databases.
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Set how database memory is mapped.
    pub fn backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }

    pub fn get_database_size(&self) -> usize {
        self.database_size
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    pub fn get_access(&self) -> Access {
        self.access
    }

    pub fn get_backing(&self) -> Backing {
        self.backing
    }

    /// Check that the sizes describe a mappable, translatable region.
    pub fn validate(&self) -> Result<(), RegexError> {
        if !self.page_size.is_power_of_two() {
            return Err(RegexError::InvalidArgument(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        if self.database_size == 0 || self.database_size % self.page_size != 0 {
            return Err(RegexError::InvalidArgument(format!(
                "database size {} is not a non-zero multiple of the page size {}",
                self.database_size, self.page_size
            )));
        }
        Ok(())
    }
}

impl Default for RegexConfig {
    fn default() -> Self {
        Self::new()
    }
}
