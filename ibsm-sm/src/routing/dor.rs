//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::config::SmConfig;
use crate::error::Error;
use crate::routing::{SelectMode, UcastEngine, build_lfts, compute_min_hops};
use crate::subnet::Subnet;

// Dimension-order routing: min-hop with a strictly deterministic
// lowest-port tie break, keeping mesh traversal order consistent across
// switches.
pub(crate) struct Dor;

impl UcastEngine for Dor {
    fn name(&self) -> &'static str {
        "dor"
    }

    fn build(
        &mut self,
        config: &SmConfig,
        subnet: &mut Subnet,
    ) -> Result<(), Error> {
        compute_min_hops(config, subnet);
        build_lfts(config, subnet, SelectMode::FirstPort)
    }
}
