//! Test suites exercising the broker over real Unix sockets.

mod support;
