// src/device/tests.rs

use std::path::PathBuf;

use test_log::test;

use super::*;
use crate::binding::{LoaderExtensions, LoaderVariant};
use crate::config::DisplayOptions;
use crate::error::SurfacelessError;
use crate::testing::{LoaderEvent, MockDriver, MockLoader, MockNode};

fn render(n: u32) -> PathBuf {
    PathBuf::from(format!("/dev/dri/renderD{}", 128 + n))
}

fn card(n: u32) -> PathBuf {
    PathBuf::from(format!("/dev/dri/card{}", n))
}

fn gpu_list(count: u32) -> DeviceList {
    let mut list = DeviceList::with_software_device();
    for n in 0..count {
        list.push_drm(Some(card(n)), None, Some(render(n)));
    }
    list
}

#[test]
fn it_should_classify_minor_numbers() {
    assert_eq!(NodeType::from_minor(0), Some(NodeType::Primary));
    assert_eq!(NodeType::from_minor(63), Some(NodeType::Primary));
    assert_eq!(NodeType::from_minor(64), Some(NodeType::Control));
    assert_eq!(NodeType::from_minor(128), Some(NodeType::Render));
    assert_eq!(NodeType::from_minor(255), Some(NodeType::Render));
    assert_eq!(NodeType::from_minor(256), None);
}

#[test]
fn it_should_derive_node_availability_from_paths() {
    let mut list = DeviceList::new();
    let id = list.push_drm(Some(card(0)), None, Some(render(0)));
    let device = list.get(id).unwrap();
    assert_eq!(device.available_nodes(), NodeMask::PRIMARY | NodeMask::RENDER);
    assert!(!device.has_node(NodeType::Control));
    assert_eq!(device.node_path(NodeType::Render), Some(render(0).as_path()));
    assert!(list.software_device().is_none());
}

#[test]
fn it_should_not_open_anything_when_no_candidate_is_eligible() {
    let mut list = DeviceList::with_software_device();
    list.push(DeviceClass::empty(), NodeMask::RENDER, [None, None, Some(render(0))]);
    list.push_drm(Some(card(1)), None, None);

    let mut loader = MockLoader::new().with_node(render(0), MockNode::render("iris"));
    let tracker = loader.tracker();
    let mut driver = MockDriver::new();
    let options = DisplayOptions::default();

    let result = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false);
    assert!(matches!(result, Err(SurfacelessError::ProbeExhausted)));
    assert_eq!(tracker.open_calls(), 0);
}

#[test]
fn it_should_only_try_the_pinned_device() {
    let list = gpu_list(2);
    let mut loader = MockLoader::new()
        .with_node(render(0), MockNode::render("iris"))
        .with_node(render(1), MockNode::render("radeonsi"));
    let tracker = loader.tracker();
    let mut driver = MockDriver::new();
    let options = DisplayOptions::default().pinned_to(DeviceId(2));

    let probed = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false)
        .unwrap();
    assert_eq!(probed.device, DeviceId(2));
    assert_eq!(probed.driver_name, "radeonsi");
    assert_eq!(tracker.events(), vec![LoaderEvent::Open(render(1))]);
}

#[test]
fn it_should_close_rejected_candidates_before_moving_on() {
    let list = gpu_list(4);
    let mut loader = MockLoader::new()
        .with_node(render(0), MockNode::render("iris").failing_open())
        .with_node(render(1), MockNode::render("broken"))
        .with_node(render(2), MockNode::render("compute_only"))
        .with_node(render(3), MockNode::render("radeonsi"));
    let loader_tracker = loader.tracker();
    let mut driver = MockDriver::new()
        .failing_screen_for("broken")
        .without_graphics_for("compute_only");
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default();

    let probed = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false)
        .unwrap();

    assert_eq!(probed.device, DeviceId(4));
    assert_eq!(
        loader_tracker.events(),
        vec![
            LoaderEvent::Open(render(0)),
            LoaderEvent::Open(render(1)),
            LoaderEvent::Close(render(1)),
            LoaderEvent::Open(render(2)),
            LoaderEvent::Close(render(2)),
            LoaderEvent::Open(render(3)),
        ]
    );
    assert_eq!(loader_tracker.live_handles(), 1);
    // The compute-only screen was destroyed; only the winner's remains.
    assert_eq!(driver_tracker.live_objects().0, 1);

    drop(probed);
    assert_eq!(loader_tracker.live_handles(), 0);
}

#[test]
fn it_should_switch_virtual_gpus_to_kms_swrast_when_forcing_software() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new().with_node(card(0), MockNode::primary("virtio_gpu"));
    let mut driver = MockDriver::new();
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default();

    let probed = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, true, false)
        .unwrap();
    assert_eq!(probed.driver_name, "kms_swrast");
    assert!(probed.swrast);
    assert!(!probed.is_render_node);
    assert_eq!(probed.loader, LoaderVariant::SoftwarePbuffer);
    assert_eq!(driver_tracker.screen_requests(), vec!["kms_swrast".to_string()]);
}

#[test]
fn it_should_reject_real_gpus_when_forcing_software() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new().with_node(card(0), MockNode::primary("i915"));
    let tracker = loader.tracker();
    let mut driver = MockDriver::new();
    let options = DisplayOptions::default();

    let result = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, true, false);
    assert!(result.is_err());
    assert_eq!(tracker.open_calls(), 1);
    assert_eq!(tracker.live_handles(), 0);
}

#[test]
fn it_should_render_on_the_preferred_gpu_and_keep_the_probed_node_for_display() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new()
        .with_node(render(0), MockNode::render("iris"))
        .with_node(render(1), MockNode::render("radeonsi").named("pci-0000_03_00_0"))
        .preferring(render(1));
    let mut driver = MockDriver::new();
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default();

    let probed = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false)
        .unwrap();
    let nodes = probed.nodes.as_ref().unwrap();
    assert_eq!(nodes.render.path(), render(1).as_path());
    assert_eq!(nodes.display.as_ref().unwrap().path(), render(0).as_path());
    assert_eq!(probed.device_name.as_deref(), Some("pci-0000_03_00_0"));
    assert_eq!(probed.driver_name, "radeonsi");
    assert!(probed.display_screen.is_some());
    assert_eq!(driver_tracker.live_objects().0, 2);
}

#[test]
fn it_should_roll_back_a_split_pair_without_a_device_name() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new()
        .with_node(render(0), MockNode::render("iris"))
        .with_node(render(1), MockNode::render("radeonsi"))
        .preferring(render(1));
    let tracker = loader.tracker();
    let mut driver = MockDriver::new();
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default();

    let result = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false);
    assert!(result.is_err());
    assert_eq!(tracker.open_calls(), 2);
    assert_eq!(tracker.live_handles(), 0);
    assert!(driver_tracker.screen_requests().is_empty());
}

#[test]
fn it_should_destroy_the_render_screen_when_the_display_screen_fails() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new()
        .with_node(render(0), MockNode::render("iris"))
        .with_node(render(1), MockNode::render("radeonsi").named("pci-0000_03_00_0"))
        .preferring(render(1));
    let tracker = loader.tracker();
    let mut driver = MockDriver::new().failing_screens_after(1);
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default();

    let result = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false);
    assert!(result.is_err());
    assert_eq!(driver_tracker.screen_requests().len(), 2);
    assert_eq!(driver_tracker.live_objects().0, 0);
    assert_eq!(tracker.live_handles(), 0);
}

#[test]
fn it_should_pick_swrast_or_zink_for_the_software_device() {
    let list = gpu_list(0);
    for (zink, expected) in [(false, "swrast"), (true, "zink")] {
        let mut loader = MockLoader::new();
        let mut driver = MockDriver::new();
        let driver_tracker = driver.tracker();
        let options = DisplayOptions {
            zink,
            ..DisplayOptions::default()
        };

        let probed = DeviceProber::new(&mut loader, &mut driver, &options, false)
            .probe_software(&list, zink)
            .unwrap();
        assert_eq!(probed.driver_name, expected);
        assert_eq!(probed.device, DeviceId(0));
        assert!(probed.nodes.is_none());
        assert_eq!(probed.kopper, zink);
        assert_eq!(probed.swrast, !zink);
        assert_eq!(driver_tracker.screen_requests(), vec![expected.to_string()]);
    }
}

#[test]
fn it_should_refuse_the_software_device_when_pinned_elsewhere() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new();
    let mut driver = MockDriver::new();
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default().pinned_to(DeviceId(1));

    let result = DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_software(&list, false);
    assert!(matches!(result, Err(SurfacelessError::CandidateRejected(_))));
    assert!(driver_tracker.screen_requests().is_empty());
}

#[test]
fn it_should_select_the_presentation_loader_for_zink_unless_kopper_is_disabled() {
    let list = gpu_list(0);
    let mut loader = MockLoader::new();
    let mut driver = MockDriver::new();
    let driver_tracker = driver.tracker();
    let options = DisplayOptions {
        zink: true,
        ..DisplayOptions::default()
    };
    let probed = DeviceProber::new(&mut loader, &mut driver, &options, true)
        .probe_software(&list, true)
        .unwrap();
    assert_eq!(probed.loader, LoaderVariant::Presentation { native: true });

    let options = DisplayOptions {
        zink: true,
        kopper_disable: true,
        ..DisplayOptions::default()
    };
    let probed = DeviceProber::new(&mut loader, &mut driver, &options, true)
        .probe_software(&list, true)
        .unwrap();
    assert_eq!(probed.loader, LoaderVariant::SoftwarePbuffer);
    assert!(probed.swrast);

    let offered = driver_tracker.screen_extensions();
    assert_eq!(offered.len(), 2);
    assert!(offered[0].contains(LoaderExtensions::KOPPER_LOADER));
    assert!(!offered[0].contains(LoaderExtensions::SWRAST_PBUFFER_LOADER));
    assert!(offered[1].contains(LoaderExtensions::SWRAST_PBUFFER_LOADER | LoaderExtensions::IMAGE_LOADER));
    assert!(!offered[1].contains(LoaderExtensions::KOPPER_LOADER));
}

#[test]
fn it_should_offer_hardware_drivers_only_the_image_loader() {
    let list = gpu_list(1);
    let mut loader = MockLoader::new().with_node(render(0), MockNode::render("iris"));
    let mut driver = MockDriver::new();
    let driver_tracker = driver.tracker();
    let options = DisplayOptions::default();

    DeviceProber::new(&mut loader, &mut driver, &options, false)
        .probe_hardware(&list, false, false)
        .unwrap();
    assert_eq!(
        driver_tracker.screen_extensions(),
        vec![LoaderExtensions::IMAGE_LOADER | LoaderExtensions::IMAGE_LOOKUP]
    );
}
