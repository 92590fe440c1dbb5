pub mod lucas_kanade;
pub mod optical_flow_propagator;
