//! Generated gRPC stubs for the provisioning appliance, SPM, and proxy
//! buffer services.
//!
//! Each `.proto` package is compiled into its own module via
//! `tonic_build`; this crate just wires the `OUT_DIR` output back into a
//! navigable module tree so downstream crates can write
//! `otpa_proto::pa::v1::ProvisioningApplianceServer` instead of reaching
//! into `concat!(env!("OUT_DIR"), ...)` themselves.

pub mod common {
    pub mod v1 {
        tonic::include_proto!("otpa.common.v1");
    }
}

pub mod spm {
    pub mod v1 {
        tonic::include_proto!("otpa.spm.v1");
    }
}

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("otpa.pb.v1");
    }
}

pub mod pa {
    pub mod v1 {
        tonic::include_proto!("otpa.pa.v1");
    }
}

/// Name of the metadata header carrying a PA session token.
pub const AUTH_TOKEN_HEADER: &str = "x-opentitan-auth-token";
