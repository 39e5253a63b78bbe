mod support;

mod session_tests;
