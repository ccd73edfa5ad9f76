//! Test doubles for the loader and driver collaborators.

pub mod mock;

pub use mock::{
    DriverEvent, DriverTracker, LoaderEvent, LoaderTracker, MockDrawable, MockDriver, MockHandle,
    MockImage, MockLoader, MockNode, MockScreen, RecordingHost,
};
