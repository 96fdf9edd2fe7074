pub mod liquidity;
pub mod oracle;
pub mod pricing;
pub mod rpc;
