//! Frame loop behaviour against a scripted device and surface.

mod common;

use common::*;
use frameloop_core::RebuildWait;
use frameloop_renderer::{FrameError, FrameInfo, FrameOrchestrator, FrameState, OrchestratorSettings};
use frameloop_rhi::{DeviceContext, RhiError};
use frameloop_rhi::vk;

fn run_ticks(frames: &mut Orchestrator, count: usize) -> Vec<FrameInfo> {
    let mut infos = Vec::new();
    for _ in 0..count {
        let drawn = frames.tick(|_, info| infos.push(*info)).unwrap();
        assert!(drawn, "frame was skipped");
    }
    infos
}

fn settings(frames_in_flight: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        frames_in_flight,
        ..Default::default()
    }
}

#[test]
fn test_steady_state_cycles_slots_and_images() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    let infos = run_ticks(&mut frames, 5);

    assert_eq!(frames.frame_counter(), 5);
    assert_eq!(frames.rebuild_count(), 0);
    assert_eq!(frames.state(), FrameState::Idle);

    let frame_indices: Vec<u64> = infos.iter().map(|i| i.frame_index).collect();
    let slots: Vec<usize> = infos.iter().map(|i| i.slot_index).collect();
    let images: Vec<u32> = infos.iter().map(|i| i.image_index).collect();
    assert_eq!(frame_indices, [0, 1, 2, 3, 4]);
    assert_eq!(slots, [0, 1, 0, 1, 0]);
    assert_eq!(images, [0, 1, 2, 0, 1]);
    assert!(infos.iter().all(|i| i.extent == extent(800, 600)));
    assert!(infos.iter().all(|i| !i.render_pass_changed));

    {
        let log = log.borrow();
        assert_eq!(log.acquires, 5);
        assert_eq!(log.submits, 5);
        assert_eq!(log.chains_created, [extent(800, 600)]);
        assert_eq!(log.allocations, [3]);
    }
    assert_eq!(frames.command_buffer_count(), 3);
    assert_no_violations(&log);
}

#[test]
fn test_drop_releases_everything() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 3);
    frames.rebuild().unwrap();
    run_ticks(&mut frames, 3);
    drop(frames);

    let log = log.borrow();
    assert_eq!(log.live_chains, 0);
    assert_eq!(log.chains_dropped, log.chains_created.len());
    assert_eq!(log.live_buffer_count(), 0);
    assert_eq!(log.wait_idle_calls, 1);
    assert!(log.violations.is_empty(), "violations: {:#?}", log.violations);
}

#[test]
fn test_resize_applies_before_next_draw() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    run_ticks(&mut frames, 2);
    frames.surface_mut().resize(400, 300);

    let infos = run_ticks(&mut frames, 1);
    assert_eq!(infos[0].extent, extent(400, 300));
    assert!(!infos[0].render_pass_changed);
    assert_eq!(frames.extent(), extent(400, 300));
    assert_eq!(frames.rebuild_count(), 1);
    assert_eq!(frames.frame_counter(), 3);
    assert_eq!(
        log.borrow().chains_created,
        [extent(800, 600), extent(400, 300)]
    );
    assert_no_violations(&log);
}

#[test]
fn test_resize_during_frame_rebuilds_after_present() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    let info = frames.begin_frame().unwrap().unwrap();
    assert_eq!(info.extent, extent(800, 600));
    frames.surface_mut().resize(1024, 768);
    frames.end_frame().unwrap();

    assert_eq!(frames.rebuild_count(), 1);
    assert_eq!(frames.extent(), extent(1024, 768));
    assert_eq!(frames.state(), FrameState::Idle);
    assert_no_violations(&log);
}

#[test]
fn test_minimized_at_construction_stalls() {
    let log = new_log();
    let surface = StubSurface::new(800, 600);
    surface.zero_polls.set(3);

    let frames = orchestrator_with(&log, surface, OrchestratorSettings::default());

    assert_eq!(frames.surface().waits, 3);
    assert_eq!(frames.extent(), extent(800, 600));
    assert_eq!(log.borrow().chains_created.len(), 1);
    assert_no_violations(&log);
}

#[test]
fn test_minimize_then_restore_during_loop() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 2);

    frames.surface_mut().minimize_for(4);
    frames.surface_mut().extent = (640, 480);

    let infos = run_ticks(&mut frames, 1);
    assert_eq!(frames.surface().waits, 4);
    assert_eq!(infos[0].extent, extent(640, 480));
    assert_eq!(frames.rebuild_count(), 1);

    // No chain is ever built while the surface has zero size.
    assert!(
        log.borrow()
            .chains_created
            .iter()
            .all(|e| e.width > 0 && e.height > 0)
    );
    assert_no_violations(&log);
}

#[test]
fn test_rebuild_is_idempotent() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 1);

    let pass = frames.render_pass();
    frames.rebuild().unwrap();
    frames.rebuild().unwrap();

    assert_eq!(frames.rebuild_count(), 2);
    assert_eq!(frames.extent(), extent(800, 600));
    assert_eq!(frames.image_count(), 3);
    assert_eq!(frames.render_pass(), pass);
    {
        let log = log.borrow();
        assert_eq!(log.allocations, [3]);
        assert_eq!(log.frees, 0);
        assert_eq!(log.live_chains, 1);
        assert_eq!(log.chains_dropped, 2);
    }

    let infos = run_ticks(&mut frames, 1);
    assert!(!infos[0].render_pass_changed);
    assert_no_violations(&log);
}

#[test]
fn test_out_of_date_acquire_skips_frame() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    log.borrow_mut()
        .acquire_script
        .push_back(Scripted::OutOfDate);

    let mut drawn = false;
    let presented = frames.tick(|_, _| drawn = true).unwrap();

    assert!(!presented);
    assert!(!drawn);
    assert_eq!(frames.frame_counter(), 0);
    assert_eq!(frames.rebuild_count(), 1);
    assert_eq!(frames.state(), FrameState::Idle);
    assert_eq!(log.borrow().submits, 0);

    run_ticks(&mut frames, 2);
    assert_eq!(frames.frame_counter(), 2);
    assert_no_violations(&log);
}

#[test]
fn test_suboptimal_acquire_still_presents() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    log.borrow_mut()
        .acquire_script
        .push_back(Scripted::Suboptimal);

    let infos = run_ticks(&mut frames, 1);

    assert_eq!(infos.len(), 1);
    assert_eq!(frames.frame_counter(), 1);
    assert_eq!(log.borrow().submits, 1);
    assert_eq!(frames.rebuild_count(), 1);
    assert!(!frames.is_rebuild_pending());
    assert_no_violations(&log);
}

#[test]
fn test_stale_present_rebuilds() {
    for scripted in [Scripted::OutOfDate, Scripted::Suboptimal] {
        let log = new_log();
        let mut frames = orchestrator(&log, 800, 600);
        log.borrow_mut().present_script.push_back(scripted);

        run_ticks(&mut frames, 1);
        assert_eq!(frames.frame_counter(), 1, "{scripted:?}");
        assert_eq!(frames.rebuild_count(), 1, "{scripted:?}");

        run_ticks(&mut frames, 2);
        assert_eq!(frames.rebuild_count(), 1, "{scripted:?}");
        assert_no_violations(&log);
    }
}

#[test]
fn test_present_failure_is_fatal() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    log.borrow_mut().present_script.push_back(Scripted::Fail);

    let result = frames.tick(|_, _| {});
    assert!(matches!(
        result,
        Err(FrameError::Rhi(RhiError::PresentFailed(_)))
    ));
    assert_eq!(frames.frame_counter(), 0);
    assert_eq!(frames.rebuild_count(), 0);

    // The failed frame is never retried.
    assert!(matches!(
        frames.begin_frame(),
        Err(FrameError::InvalidState { .. })
    ));

    drop(frames);
    assert_eq!(log.borrow().live_chains, 0);
    assert_no_violations(&log);
}

#[test]
fn test_acquire_failure_is_fatal() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    log.borrow_mut().acquire_script.push_back(Scripted::Fail);

    assert!(matches!(
        frames.begin_frame(),
        Err(FrameError::Rhi(RhiError::AcquireFailed(_)))
    ));
    assert_eq!(frames.state(), FrameState::Idle);
    assert_no_violations(&log);
}

#[test]
fn test_requested_rebuild_runs_at_next_frame() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    frames.request_rebuild();
    assert!(frames.is_rebuild_pending());
    assert_eq!(frames.rebuild_count(), 0);

    run_ticks(&mut frames, 1);
    assert!(!frames.is_rebuild_pending());
    assert_eq!(frames.rebuild_count(), 1);
    assert_no_violations(&log);
}

#[test]
fn test_image_count_change_reallocates_command_buffers() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 3);

    log.borrow_mut().surface = surface_support(1, 2);
    frames.rebuild().unwrap();

    assert_eq!(frames.image_count(), 2);
    assert_eq!(frames.command_buffer_count(), 2);
    {
        let log = log.borrow();
        assert_eq!(log.allocations, [3, 2]);
        assert_eq!(log.frees, 1);
        assert_eq!(log.live_buffer_count(), 2);
    }

    let infos = run_ticks(&mut frames, 4);
    assert!(infos.iter().all(|i| i.image_index < 2));
    assert_no_violations(&log);
}

#[test]
fn test_format_change_flags_render_pass_once() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 1);
    let old_pass = frames.render_pass();

    log.borrow_mut().surface.formats = vec![vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }];
    frames.rebuild().unwrap();
    assert_ne!(frames.render_pass(), old_pass);

    let infos = run_ticks(&mut frames, 2);
    assert!(infos[0].render_pass_changed);
    assert!(!infos[1].render_pass_changed);
    assert_no_violations(&log);
}

#[test]
fn test_manual_frame_protocol() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    assert!(frames.current_command_buffer().is_none());
    frames.begin_frame().unwrap().unwrap();
    assert_eq!(frames.state(), FrameState::Acquired);

    let recorded = frames.current_command_buffer().unwrap();
    let command_buffer = frames.begin_render_pass().unwrap();
    assert_eq!(command_buffer, recorded);
    assert_eq!(frames.state(), FrameState::Recording);

    frames.end_render_pass().unwrap();
    frames.end_frame().unwrap();
    assert_eq!(frames.state(), FrameState::Idle);
    assert_eq!(frames.frame_counter(), 1);
    assert_no_violations(&log);
}

#[test]
fn test_out_of_order_calls_are_rejected() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    assert!(matches!(
        frames.end_frame(),
        Err(FrameError::InvalidState {
            operation: "end_frame",
            state: FrameState::Idle
        })
    ));
    assert!(matches!(
        frames.begin_render_pass(),
        Err(FrameError::InvalidState { .. })
    ));

    frames.begin_frame().unwrap().unwrap();
    assert!(matches!(
        frames.begin_frame(),
        Err(FrameError::InvalidState {
            operation: "begin_frame",
            state: FrameState::Acquired
        })
    ));
    assert!(matches!(
        frames.rebuild(),
        Err(FrameError::InvalidState { .. })
    ));

    frames.begin_render_pass().unwrap();
    assert!(matches!(
        frames.end_frame(),
        Err(FrameError::InvalidState {
            state: FrameState::Recording,
            ..
        })
    ));

    frames.end_render_pass().unwrap();
    frames.end_frame().unwrap();
    assert_eq!(log.borrow().acquires, 1);
    assert_no_violations(&log);
}

#[test]
fn test_submit_immediate() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    let mut recorded = None;
    frames.submit_immediate(|cmd| recorded = Some(cmd)).unwrap();
    assert!(recorded.is_some());
    assert_eq!(log.borrow().single_use_submits, 1);

    frames.begin_frame().unwrap().unwrap();
    assert!(matches!(
        frames.submit_immediate(|_| {}),
        Err(FrameError::InvalidState {
            operation: "submit_immediate",
            ..
        })
    ));
    assert_eq!(log.borrow().single_use_submits, 1);
    assert_no_violations(&log);
}

#[test]
fn test_too_many_frames_in_flight_at_construction() {
    let log = new_log();
    let result = FrameOrchestrator::new(MockDevice::new(&log), StubSurface::new(800, 600), settings(4));

    let Err(err) = result else {
        panic!("four slots over three images must fail");
    };
    assert!(matches!(
        err,
        FrameError::TooManyFramesInFlight {
            frames: 4,
            images: 3
        }
    ));
    assert_eq!(log.borrow().live_chains, 0);
}

#[test]
fn test_zero_frames_in_flight_is_rejected() {
    let log = new_log();
    let result = FrameOrchestrator::new(MockDevice::new(&log), StubSurface::new(800, 600), settings(0));

    let Err(err) = result else {
        panic!("zero slots must fail");
    };
    assert!(matches!(err, FrameError::Platform(_)));
    assert!(log.borrow().chains_created.is_empty());
}

#[test]
fn test_too_many_frames_in_flight_after_rebuild() {
    let log = new_log();
    let mut frames = orchestrator_with(&log, StubSurface::new(800, 600), settings(3));
    run_ticks(&mut frames, 3);

    log.borrow_mut().surface = surface_support(1, 2);
    assert!(matches!(
        frames.rebuild(),
        Err(FrameError::TooManyFramesInFlight {
            frames: 3,
            images: 2
        })
    ));
}

#[test]
fn test_close_while_minimized_at_construction() {
    let log = new_log();
    let mut surface = StubSurface::new(800, 600);
    surface.zero_polls.set(usize::MAX);
    surface.close_after_waits = Some(2);

    let result = FrameOrchestrator::new(MockDevice::new(&log), surface, OrchestratorSettings::default());

    let Err(err) = result else {
        panic!("closing while minimized must fail");
    };
    assert!(matches!(err, FrameError::SurfaceClosed));
    assert!(log.borrow().chains_created.is_empty());
}

#[test]
fn test_close_while_minimized_in_loop() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 2);

    let surface = frames.surface_mut();
    surface.minimize_for(usize::MAX);
    surface.close_after_waits = Some(surface.waits + 3);

    assert!(matches!(
        frames.tick(|_, _| {}),
        Err(FrameError::SurfaceClosed)
    ));
    assert_eq!(frames.surface().waits, 3);
    assert_eq!(log.borrow().chains_created.len(), 1);
    assert_no_violations(&log);
}

#[test]
fn test_restore_event_during_stall_rebuilds_once() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    run_ticks(&mut frames, 1);

    frames.surface_mut().resize_on_wake = true;
    frames.surface_mut().minimize_for(2);

    run_ticks(&mut frames, 1);
    assert_eq!(frames.surface().waits, 2);
    assert_eq!(frames.rebuild_count(), 1);
    assert_eq!(log.borrow().chains_created.len(), 2);

    run_ticks(&mut frames, 1);
    assert_eq!(frames.rebuild_count(), 1);
    assert_no_violations(&log);
}

#[test]
fn test_slot_buffer_reused_only_after_its_fence() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);

    let info = frames.begin_frame().unwrap().unwrap();
    let first = frames.current_command_buffer().unwrap();
    frames.begin_render_pass().unwrap();
    frames.end_render_pass().unwrap();
    frames.end_frame().unwrap();
    assert_eq!(info.slot_index, 0);

    // Slot 1, then slot 0 again with the same buffer.
    let infos = run_ticks(&mut frames, 2);
    assert_eq!(infos[1].slot_index, 0);
    assert_no_violations(&log);

    // Slot 0's latest submission has not been waited yet.
    frames.device().begin_recording(first).unwrap();
    let violations = log.borrow().violations.clone();
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("before its slot fence was waited"));
}

#[test]
fn test_device_idle_rebuild_wait() {
    let log = new_log();
    let settings = OrchestratorSettings {
        rebuild_wait: RebuildWait::DeviceIdle,
        ..Default::default()
    };
    let mut frames = orchestrator_with(&log, StubSurface::new(800, 600), settings);
    log.borrow_mut().present_script.push_back(Scripted::OutOfDate);

    run_ticks(&mut frames, 2);
    assert_eq!(frames.rebuild_count(), 1);
    assert_eq!(log.borrow().wait_idle_calls, 1);
    assert_no_violations(&log);
}

#[test]
fn test_in_flight_rebuild_wait_avoids_device_idle() {
    let log = new_log();
    let mut frames = orchestrator(&log, 800, 600);
    log.borrow_mut().present_script.push_back(Scripted::OutOfDate);

    run_ticks(&mut frames, 2);
    assert_eq!(frames.rebuild_count(), 1);
    assert_eq!(log.borrow().wait_idle_calls, 0);
    assert_no_violations(&log);
}

#[test]
fn test_long_run_with_mixed_staleness() {
    let log = new_log();
    let mut frames = orchestrator_with(&log, StubSurface::new(800, 600), settings(3));

    let mut presented = 0u64;
    for tick in 0..60u32 {
        match tick % 7 {
            1 => log.borrow_mut().acquire_script.push_back(Scripted::Suboptimal),
            2 => log.borrow_mut().present_script.push_back(Scripted::OutOfDate),
            4 => log.borrow_mut().acquire_script.push_back(Scripted::OutOfDate),
            5 => frames.surface_mut().resize(640 + tick, 480 + tick),
            6 if tick % 3 == 0 => frames.surface_mut().minimize_for(2),
            _ => {}
        }

        let mut last_extent = None;
        if frames.tick(|_, info| last_extent = Some(info.extent)).unwrap() {
            presented += 1;
            assert_eq!(last_extent, Some(frames.extent()));
        }
    }

    assert_eq!(frames.frame_counter(), presented);
    assert!(frames.rebuild_count() > 0);
    assert_eq!(log.borrow().submits as u64, presented);
    assert_no_violations(&log);
}
