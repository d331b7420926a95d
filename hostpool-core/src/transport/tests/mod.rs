mod http1_tests;
mod tcp_tests;
