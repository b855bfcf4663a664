pub mod serve_util;
