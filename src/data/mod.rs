//! Data layer: raw decoding, row types, filtering and table output.
//!
//! Architecture:
//! ```text
//!  .pkl            .xlsx / .csv        Left.zip / Right.zip
//!    │                 │                    │
//!    ▼                 ▼                    ▼
//!   ┌────────┐   ┌──────────┐         ┌──────────┐
//!   │ pickle │   │  loader  │         │  loader  │  HR.csv member
//!   └────────┘   └──────────┘         └──────────┘
//!    │  RawSubjectRecord │  SwellSheet       │  HeartRateExport
//!    ▼                   │                   │
//!   ┌────────┐           │                   │
//!   │ filter │  labels 1-4, stride           │
//!   └────────┘           │                   │
//!    │                   ▼                   ▼
//!    └──────────────► ┌──────────┐ ◄─────────┘
//!                     │  writer  │  CSV / parquet
//!                     └──────────┘
//! ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod pickle;
pub mod writer;
