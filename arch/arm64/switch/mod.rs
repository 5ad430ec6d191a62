//! World switch
//!
//! [`run_vcpu`] moves the core from the host into a vCPU and back. One call
//! is one run: the guest may be entered many times, as long as every exit
//! can be dealt with at EL2, and the call returns with the exit the host has
//! to look at.
//!
//! ## Run sequence
//!
//! ```text
//! host state saved -> stage-2 loaded -> guest traps armed -> guest loaded
//!     -> [ enter guest -> classify exit ]* -> guest saved
//!     -> host traps back -> host loaded -> exit code
//! ```
//!
//! Any step that cannot complete goes to [`panic::hyp_panic`].

pub mod exit;
pub mod mode;
pub mod panic;
pub mod traps;
pub mod tvm;
pub mod workaround;

pub use exit::{fixup_guest_exit, ExitAction};
pub use mode::{HostMode, Nvhe, Vhe};
pub use panic::{hyp_panic, unexpected_el2_exception, PanicRecord};
pub use traps::{ArmedTraps, GuestTraps, HostTraps};

use crate::arch::arm64::cpu::features::HostModeKind;
use crate::arch::arm64::cpu::fpu;
use crate::arch::arm64::cpu::hw::SysRegOps;
use crate::arch::arm64::cpu::vcpu::{TrapRecord, Vcpu};
use crate::arch::arm64::hooks::{HaltFacility, SwitchHooks};
use crate::arch::arm64::mmu::stage2;
use crate::arch::arm64::percpu::PerCoreState;
use crate::arch::arm64::ExitCode;

/// Run `vcpu` on this core until an exit needs the host
///
/// The vCPU must be loaded on the core. The returned code is the exit of
/// the last entry; fault details of an abort are left in the vCPU.
pub fn run_vcpu<H, K, P>(
    core: &mut PerCoreState,
    vcpu: &mut Vcpu,
    hooks: &mut K,
    halt: &mut P,
    hw: &mut H,
) -> ExitCode
where
    H: SysRegOps,
    K: SwitchHooks,
    P: HaltFacility,
{
    match core.caps.mode {
        HostModeKind::Vhe => vcpu_run::<Vhe, _, _, _>(core, vcpu, hooks, halt, hw),
        HostModeKind::Nvhe => vcpu_run::<Nvhe, _, _, _>(core, vcpu, hooks, halt, hw),
    }
}

/// Run loop for host mode `M`
pub fn vcpu_run<M, H, K, P>(
    core: &mut PerCoreState,
    vcpu: &mut Vcpu,
    hooks: &mut K,
    halt: &mut P,
    hw: &mut H,
) -> ExitCode
where
    M: HostMode,
    H: SysRegOps,
    K: SwitchHooks,
    P: HaltFacility,
{
    if core.caps.mode != M::KIND || !vcpu.is_loaded() {
        log::error!(
            "cpu{}: vcpu{} cannot run (core mode {:?}, run mode {:?}, loaded {})",
            core.cpu_id(),
            vcpu.id(),
            core.caps.mode,
            M::KIND,
            vcpu.is_loaded()
        );
        hyp_panic::<M, _, _, _>(core, Some(vcpu), hooks, halt, hw);
    }

    let pmu_switched = M::prepare(core, hw);
    M::save_host(core, hw);

    if stage2::activate_vm(&vcpu.stage2, &core.caps, hw).is_err() {
        hyp_panic::<M, _, _, _>(core, Some(vcpu), hooks, halt, hw);
    }

    let guest_owns_fp = fpu::update_fp_enabled(vcpu, &core.caps);
    let armed = GuestTraps::compute(vcpu, &core.caps, guest_owns_fp, core.hyp_vectors).apply(hw);

    M::restore_guest(vcpu, core, hooks, hw);
    hooks.debug_switch_to_guest(vcpu, hw);
    core.workaround.enter_guest(vcpu, &core.caps, hw);

    let exit = loop {
        // SAFETY: traps, stage-2 and the guest's return state were all
        // programmed above, or left in place by the previous exit
        let raw = unsafe { hw.guest_enter(&mut vcpu.ctxt.gp, &mut core.host.gp) };

        let Some(code) = ExitCode::from_raw(raw) else {
            log::error!("vcpu{}: exit code {:#x} from the vectors", vcpu.id(), raw);
            hyp_panic::<M, _, _, _>(core, Some(vcpu), hooks, halt, hw);
        };

        let mut record = TrapRecord::new(code);
        match exit::fixup_guest_exit(vcpu, core, &mut record, hooks, hw) {
            ExitAction::ResumeGuest => {
                log::trace!("vcpu{}: resuming after {:?}", vcpu.id(), record.class);
            }
            ExitAction::ReturnToHost => {
                vcpu.fault = record.fault_info();
                break record.exit;
            }
        }
    };

    core.workaround.leave_guest(hw);
    M::save_guest(vcpu, core, hooks, hw);

    armed.disarm(vcpu, &core.host_traps, hw);
    M::restore_host(core, hw);

    fpu::save_fpexc32(vcpu, hw);
    hooks.debug_switch_to_host(vcpu, hw);
    M::finish(core, pmu_switched, hw);

    log::debug!("vcpu{}: exit {:?}", vcpu.id(), exit);
    exit
}
