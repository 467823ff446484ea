// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RDMSR/WRMSR dispatch.

use slog::{debug, info, trace};

use crate::guest::MsrEnv;
use crate::handlers::HandlerRegistry;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRangeTable;
use crate::state::VcpuMsrState;
use crate::stats::{bump, MsrStats, MsrStatsSnapshot, RangeStatsSnapshot};

#[usdt::provider(provider = "msr")]
mod probes {
    fn rdmsr(vcpu: u32, msr: u32, value: u64, result: u8) {}
    fn wrmsr(vcpu: u32, msr: u32, value: u64, raw: u64, result: u8) {}
}

/// Emulates RDMSR and WRMSR for the vCPUs of one VM.
///
/// The engine is shared by all of the VM's vCPUs. Each call operates on the
/// calling vCPU's [`VcpuMsrState`], which the caller owns.
pub struct MsrEngine {
    log: slog::Logger,
    env: MsrEnv,
    table: MsrRangeTable,
    handlers: HandlerRegistry,
    stats: MsrStats,
}

impl MsrEngine {
    pub fn new(log: &slog::Logger, table: MsrRangeTable, env: MsrEnv) -> Self {
        let log = log.new(slog::o!("component" => "msr"));
        info!(
            log,
            "MSR engine ready";
            "vendor" => ?env.info.vendor,
            "ranges" => table.len()
        );
        Self {
            log,
            env,
            table,
            handlers: HandlerRegistry::new(),
            stats: MsrStats::default(),
        }
    }

    /// Emulates RDMSR of `id` by the vCPU owning `state`.
    ///
    /// Unknown MSRs raise #GP. The value carried by a non-`Handled` outcome is
    /// always 0.
    pub fn query(&self, state: &VcpuMsrState, id: MsrId) -> RdmsrOutcome {
        let out = match self.table.lookup(id) {
            None => {
                bump(&self.stats.reads);
                bump(&self.stats.reads_unknown);
                debug!(self.log, "rdmsr of unknown MSR";
                    "vcpu" => state.vcpu.0,
                    "msr" => %id
                );
                RdmsrOutcome::GpException
            }
            Some(hit) => {
                let range_stats = self.table.hit_stats(&hit);
                range_stats.read();
                bump(&self.stats.reads);

                let handler = self.handlers.rd(hit.range.rd);
                let out = handler(&self.env, state, hit.id, hit.range);
                match out {
                    RdmsrOutcome::Handled(value) => {
                        trace!(self.log, "rdmsr";
                            "vcpu" => state.vcpu.0,
                            "msr" => %id,
                            "name" => %hit.range.name,
                            "value" => value
                        );
                    }
                    RdmsrOutcome::GpException => {
                        range_stats.gp();
                        bump(&self.stats.reads_raise_gp);
                        debug!(self.log, "rdmsr raised #GP";
                            "vcpu" => state.vcpu.0,
                            "msr" => %id,
                            "name" => %hit.range.name
                        );
                    }
                    RdmsrOutcome::RetryInFullContext => {
                        debug!(self.log, "rdmsr deferred to full context";
                            "vcpu" => state.vcpu.0,
                            "msr" => %id
                        );
                    }
                }
                out
            }
        };

        probes::rdmsr!(|| (
            state.vcpu.0,
            id.0,
            out.value(),
            out.result() as u8
        ));
        out
    }

    /// Emulates WRMSR of `raw` to `id` by the vCPU owning `state`.
    ///
    /// A write setting any bit in the range's #GP mask faults before the
    /// handler runs, leaving `state` untouched. Otherwise the handler sees the
    /// value with the range's ignored bits cleared alongside the raw value.
    pub fn set(
        &self,
        state: &mut VcpuMsrState,
        id: MsrId,
        raw: u64,
    ) -> WrmsrOutcome {
        let mut value = raw;
        let out = match self.table.lookup(id) {
            None => {
                bump(&self.stats.writes);
                bump(&self.stats.writes_unknown);
                debug!(self.log, "wrmsr of unknown MSR";
                    "vcpu" => state.vcpu.0,
                    "msr" => %id,
                    "value" => raw
                );
                WrmsrOutcome::GpException
            }
            Some(hit) => {
                let range = hit.range;
                let range_stats = self.table.hit_stats(&hit);
                range_stats.write();
                bump(&self.stats.writes);

                let gp_bits = raw & range.wr_gp_mask;
                if gp_bits != 0 {
                    range_stats.gp();
                    bump(&self.stats.writes_raise_gp);
                    debug!(self.log, "wrmsr sets reserved bits";
                        "vcpu" => state.vcpu.0,
                        "msr" => %id,
                        "name" => %range.name,
                        "value" => raw,
                        "bits" => gp_bits
                    );
                    WrmsrOutcome::GpException
                } else {
                    value = raw & !range.wr_ign_mask;
                    if value != raw {
                        range_stats.ignored_bits();
                        bump(&self.stats.writes_to_ignored_bits);
                    }

                    let handler = self.handlers.wr(range.wr);
                    let out =
                        handler(&self.env, state, hit.id, range, value, raw);
                    match out {
                        WrmsrOutcome::Handled => {
                            trace!(self.log, "wrmsr";
                                "vcpu" => state.vcpu.0,
                                "msr" => %id,
                                "name" => %range.name,
                                "value" => value
                            );
                        }
                        WrmsrOutcome::GpException => {
                            range_stats.gp();
                            bump(&self.stats.writes_raise_gp);
                            debug!(self.log, "wrmsr raised #GP";
                                "vcpu" => state.vcpu.0,
                                "msr" => %id,
                                "name" => %range.name,
                                "value" => raw
                            );
                        }
                        WrmsrOutcome::RetryInFullContext => {
                            debug!(self.log, "wrmsr deferred to full context";
                                "vcpu" => state.vcpu.0,
                                "msr" => %id
                            );
                        }
                    }
                    out
                }
            }
        };

        probes::wrmsr!(|| (
            state.vcpu.0,
            id.0,
            value,
            raw,
            out.result() as u8
        ));
        out
    }

    pub fn env(&self) -> &MsrEnv {
        &self.env
    }

    pub fn table(&self) -> &MsrRangeTable {
        &self.table
    }

    pub fn stats(&self) -> MsrStatsSnapshot {
        self.stats.snapshot()
    }

    /// Counters for the range containing `id`. For an alias these count only
    /// the accesses made through the alias.
    pub fn range_stats(&self, id: MsrId) -> Option<RangeStatsSnapshot> {
        let index = self.table.position(id)?;
        Some(self.table.stats(index).snapshot())
    }
}
