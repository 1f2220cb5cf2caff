mod quiescence;

pub use quiescence::QuiescenceFraming;
