//! Property-Based Tests for the SGSN core
//!
//! State machine tables, identity allocation and teardown of the context
//! graph under arbitrary input sequences.

#[cfg(test)]
mod tests {
    use crate::config::{AuthPolicy, SgsnConfig};
    use crate::context::{Rai, RanType, SgsnContext};
    use crate::gmm_handler::MmEvent;
    use crate::gmm_sm::{GmmEvent, GmmFsm, GmmState, RatChangeData};
    use crate::mm_state_sm::{IuMmEvent, IuMmState, IuMmStateFsm};
    use crate::ptmsi::{GSM_RESERVED_TMSI, TMSI_SGSN_MASK};
    use crate::sm::{Fsm, FsmResult};
    use crate::test_support::{test_context, PathCall};
    use crate::timer::SgsnTimerId;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    // ========================================================================
    // Strategies
    // ========================================================================

    fn arb_ran_type() -> impl Strategy<Value = RanType> {
        prop_oneof![Just(RanType::GeranGb), Just(RanType::UtranIu)]
    }

    fn arb_gmm_event() -> impl Strategy<Value = GmmEvent> {
        prop_oneof![
            Just(GmmEvent::CommonProcInitReq),
            Just(GmmEvent::CommonProcSuccess),
            Just(GmmEvent::AttachSuccess),
            Just(GmmEvent::Suspend),
            Just(GmmEvent::Resume),
            Just(GmmEvent::Cleanup),
            arb_ran_type().prop_map(|new_ran_type| GmmEvent::RatChange(RatChangeData {
                new_ran_type,
                llme: None,
            })),
        ]
    }

    fn arb_iu_event() -> impl Strategy<Value = IuMmEvent> {
        prop_oneof![
            Just(IuMmEvent::PsAttach),
            Just(IuMmEvent::PsConnRelease),
            Just(IuMmEvent::PsConnEstablish),
            Just(IuMmEvent::ImplicitDetach),
            Just(IuMmEvent::RaUpdate),
        ]
    }

    fn rai() -> Rai {
        Rai::new(1, 1, 1, 1)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Cleanup returns the GMM machine to Deregistered from anywhere
        #[test]
        fn prop_gmm_cleanup_always_deregisters(events in prop::collection::vec(arb_gmm_event(), 0..30)) {
            let mut fsm = GmmFsm::new(1);
            for event in &events {
                fsm.dispatch(event);
            }
            fsm.dispatch(&GmmEvent::Cleanup);
            prop_assert_eq!(fsm.state(), GmmState::Deregistered);
        }

        /// Only CommonProcInit is left on an access type change
        #[test]
        fn prop_gmm_rat_change(
            events in prop::collection::vec(arb_gmm_event(), 0..30),
            ran in arb_ran_type(),
        ) {
            let mut fsm = GmmFsm::new(1);
            for event in &events {
                fsm.dispatch(event);
            }
            let before = fsm.state();
            let result = fsm.dispatch(&GmmEvent::RatChange(RatChangeData { new_ran_type: ran, llme: None }));
            if before == GmmState::CommonProcInit {
                prop_assert_eq!(result, FsmResult::Transition(GmmState::Deregistered));
            } else {
                prop_assert_eq!(result, FsmResult::Handled);
                prop_assert_eq!(fsm.state(), before);
            }
        }

        /// PMM-IDLE is only entered from PMM-CONNECTED on a connection release
        #[test]
        fn prop_iu_idle_entry(events in prop::collection::vec(arb_iu_event(), 1..40)) {
            let mut fsm = IuMmStateFsm::new(1);
            for event in &events {
                let before = fsm.state();
                let result = fsm.dispatch(event);
                if result == FsmResult::Transition(IuMmState::Idle) {
                    prop_assert_eq!(before, IuMmState::Connected);
                    prop_assert_eq!(*event, IuMmEvent::PsConnRelease);
                }
                if *event == IuMmEvent::ImplicitDetach {
                    prop_assert_eq!(fsm.state(), IuMmState::Detached);
                }
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Allocated P-TMSIs carry the SGSN mask and never collide with a
        /// current or previous P-TMSI of a live context
        #[test]
        fn prop_ptmsi_unique(n in 1usize..200) {
            let (mut ctx, _calls) = test_context(SgsnConfig::default());
            let mut seen = HashSet::new();
            for i in 0..n {
                let p_tmsi = ctx.ptmsi_alloc();
                prop_assert_ne!(p_tmsi, GSM_RESERVED_TMSI);
                prop_assert_eq!(p_tmsi & TMSI_SGSN_MASK, TMSI_SGSN_MASK);
                prop_assert!(seen.insert(p_tmsi));

                let mm = ctx.mm_ctx_alloc(i as u32).unwrap();
                let m = ctx.mm_ctx_mut(mm).unwrap();
                // Alternate between current and previous slot
                if i % 2 == 0 {
                    m.p_tmsi = p_tmsi;
                } else {
                    m.p_tmsi_old = p_tmsi;
                }
            }
            for _ in 0..50 {
                let p_tmsi = ctx.ptmsi_alloc();
                prop_assert!(!seen.contains(&p_tmsi));
            }
        }

        /// NSAPIs are unique within an MM context
        #[test]
        fn prop_nsapi_unique(nsapis in prop::collection::vec(5u8..16, 0..40)) {
            let (mut ctx, _calls) = test_context(SgsnConfig::default());
            let ggsn = ctx.ggsn_ctx_alloc(0);
            let mm = ctx.mm_ctx_alloc(1).unwrap();
            let mut expected = HashSet::new();
            for nsapi in nsapis {
                let fresh = expected.insert(nsapi);
                prop_assert_eq!(ctx.pdp_ctx_alloc(mm, ggsn, nsapi).is_some(), fresh);
            }

            let list = &ctx.mm_ctx(mm).unwrap().pdp_list;
            let got: HashSet<u8> = list
                .iter()
                .map(|id| ctx.pdp_ctx(*id).unwrap().nsapi)
                .collect();
            prop_assert_eq!(list.len(), got.len());
            prop_assert_eq!(got, expected);
        }

        /// Tearing down every MM context leaves nothing behind
        #[test]
        fn prop_teardown_complete(
            subscribers in prop::collection::vec((arb_ran_type(), 0usize..4, any::<bool>()), 1..12),
        ) {
            let (mut ctx, calls) = test_context(SgsnConfig::default());
            let ggsn = ctx.ggsn_ctx_alloc(0);
            let mut mms = Vec::new();
            let mut tllis = Vec::new();
            for (i, (ran, pdps, bound)) in subscribers.iter().enumerate() {
                let tlli = 0xc000_0000 | i as u32;
                let mm = match ran {
                    RanType::GeranGb => {
                        let mm = ctx.mm_ctx_alloc_gb(tlli, &rai()).unwrap();
                        let llme = ctx.llme_alloc(tlli);
                        ctx.mm_ctx_mut(mm).unwrap().gb.llme = Some(llme);
                        tllis.push(tlli);
                        mm
                    }
                    RanType::UtranIu => ctx
                        .mm_ctx_alloc_iu(crate::context::IuUeCtx::new(i as u32, rai()))
                        .unwrap(),
                };
                for n in 0..*pdps {
                    let pdp = ctx.pdp_ctx_alloc(mm, ggsn, 5 + n as u8).unwrap();
                    if *bound {
                        ctx.pdp_bind_gtp(pdp, Ipv4Addr::new(10, 0, 0, 1)).unwrap();
                    }
                }
                ctx.gmm_fsm_dispatch(mm, &GmmEvent::AttachSuccess).unwrap();
                mms.push(mm);
            }

            for mm in &mms {
                ctx.mm_ctx_cleanup_free(*mm);
            }

            prop_assert_eq!(ctx.mm_ctx_count(), 0);
            prop_assert_eq!(ctx.pdp_ctx_count(), 0);
            prop_assert_eq!(ctx.llme_count(), 0);
            prop_assert!(ctx.ggsn_ctx(ggsn).unwrap().pdp_list.is_empty());
            prop_assert!(ctx.gtp_handles.is_empty());
            prop_assert_eq!(ctx.counters.live_groups(), 0);
            for mm in &mms {
                prop_assert!(!ctx.timers.is_pending(SgsnTimerId::GmmState(*mm)));
                prop_assert!(!ctx.timers.is_pending(SgsnTimerId::MmReady(*mm)));
            }
            let calls = calls.borrow();
            for tlli in tllis {
                prop_assert_eq!(
                    calls.iter().filter(|c| **c == PathCall::LlmeUnassign(tlli)).count(),
                    1
                );
            }
        }

        /// No two live contexts share a (TLLI, RAI) pair or an IMSI
        #[test]
        fn prop_subscriber_identity_unique(
            ops in prop::collection::vec((any::<bool>(), 0u32..4, 0u8..2, 0usize..8), 1..40),
        ) {
            let config = SgsnConfig {
                auth_policy: AuthPolicy::AcceptAll,
                ..Default::default()
            };
            let (mut ctx, _calls) = test_context(config);
            for (alloc, a, b, slot) in ops {
                if alloc {
                    let tlli = 0x7800_0000 | a;
                    let _ = ctx.mm_ctx_alloc_gb(tlli, &Rai::new(1, 1, 1, b));
                    continue;
                }
                let live: Vec<u64> = ctx.mm_ctxs().map(|mm| mm.id).collect();
                if live.is_empty() {
                    continue;
                }
                let mm = live[slot % live.len()];
                if !ctx.mm_ctx(mm).unwrap().imsi.is_empty() {
                    continue;
                }
                ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
                ctx.handle_mm_event(mm, MmEvent::IdentityResponse { imsi: format!("0010100000000{a:02}") }).unwrap();
            }

            let mut pairs = HashSet::new();
            let mut imsis = HashSet::new();
            for mm in ctx.mm_ctxs() {
                prop_assert!(pairs.insert((mm.gb.tlli, mm.ra)));
                if !mm.imsi.is_empty() {
                    prop_assert!(imsis.insert(mm.imsi.clone()));
                }
            }
        }

        /// A full attach and detach through the event handler balances
        #[test]
        fn prop_attach_detach_balanced(n in 1usize..20) {
            let config = SgsnConfig {
                auth_policy: AuthPolicy::AcceptAll,
                ..Default::default()
            };
            let (mut ctx, _calls) = test_context(config);
            let mut mms = Vec::new();
            for i in 0..n {
                let mm = ctx.mm_ctx_alloc_gb(0x7800_0000 | i as u32, &rai()).unwrap();
                ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
                ctx.handle_mm_event(mm, MmEvent::IdentityResponse { imsi: format!("00101{i:010}") }).unwrap();
                ctx.handle_mm_event(mm, MmEvent::AttachComplete).unwrap();
                prop_assert_eq!(ctx.gmm_state(mm), Some(GmmState::RegisteredNormal));
                mms.push(mm);
            }
            let ptmsis: HashSet<u32> = mms.iter().map(|mm| ctx.mm_ctx(*mm).unwrap().p_tmsi).collect();
            prop_assert_eq!(ptmsis.len(), n);

            for mm in mms {
                ctx.handle_mm_event(mm, MmEvent::Detach).unwrap();
            }
            prop_assert_eq!(ctx.mm_ctx_count(), 0);
            prop_assert_eq!(ctx.counters.live_groups(), 0);
        }
    }
}
