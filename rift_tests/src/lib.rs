//! Empty library target; the real content lives in `tests/`.
