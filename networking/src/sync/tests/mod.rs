mod peer_manager_tests;
mod service_tests;
mod support;
