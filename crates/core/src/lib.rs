//! Plate blurring for frame sequences.
//!
//! Plates are detected only on sampled keyframes; the frames in between are
//! buffered, their plate outlines tracked with optical flow from the
//! neighbouring keyframes, and every frame is composited and written in its
//! original order.

pub mod shared {
    pub mod constants;
    pub mod engine_config;
    pub mod frame;
    pub mod gray_frame;
    pub mod polygon;
    pub mod sequence_metadata;
}

pub mod blurring {
    pub mod domain {
        pub mod frame_blurrer;
    }
    pub mod infrastructure;
}

pub mod detection {
    pub mod domain {
        pub mod region_detector;
    }
    pub mod infrastructure;
}

pub mod interpolation {
    pub mod engine_error;
    pub mod engine_report;
    pub mod gap_interpolator;
    pub mod interpolation_engine;
    pub mod interpolation_logger;
    pub mod latest_slot;
    pub mod ring_frame_buffer;
}

pub mod pipeline {
    pub mod blur_plates_use_case;
    pub mod keyframe_sampler;
}

pub mod tracking {
    pub mod domain {
        pub mod motion_consistency;
        pub mod polygon_propagator;
    }
    pub mod infrastructure;
}

pub mod video {
    pub mod domain {
        pub mod frame_sink;
        pub mod frame_source;
    }
    pub mod infrastructure;
}
