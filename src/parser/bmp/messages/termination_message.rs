//! Termination Message (type 5), §4.2: carries only the common header, no body to decode.
