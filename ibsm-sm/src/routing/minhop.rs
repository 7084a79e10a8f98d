//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::config::SmConfig;
use crate::error::Error;
use crate::routing::{SelectMode, UcastEngine, build_lfts, compute_min_hops};
use crate::subnet::Subnet;

// Pure shortest-path routing with load-balanced tie breaking.
pub(crate) struct MinHop;

impl UcastEngine for MinHop {
    fn name(&self) -> &'static str {
        "minhop"
    }

    fn build(
        &mut self,
        config: &SmConfig,
        subnet: &mut Subnet,
    ) -> Result<(), Error> {
        compute_min_hops(config, subnet);
        build_lfts(config, subnet, SelectMode::Balanced)
    }
}
