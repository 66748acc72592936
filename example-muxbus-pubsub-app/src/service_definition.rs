//! Methods shared by the demo binary and the benchmarks.

use bitcode::{Decode, Encode};
use muxbus_rpc_service::{BitcodeCodec, Decoded, Encoded, RpcTimeout};
use muxbus_rpc_service_endpoint::{RpcHandlerError, RpcServiceEndpoint, RpcServiceEndpointError};
use muxbus_tokio_rpc_client::{RpcClient, RpcClientError};

pub const ADD_METHOD: &str = "math.add";
pub const ECHO_METHOD: &str = "echo";

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct AddRequest {
    pub numbers: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct AddResponse {
    pub sum: f64,
}

pub async fn register(endpoint: &RpcServiceEndpoint) -> Result<(), RpcServiceEndpointError> {
    endpoint
        .register(ECHO_METHOD, |ctx| async move { Ok(ctx.body().to_vec()) })
        .await?;

    endpoint
        .register(ADD_METHOD, |ctx| async move {
            let request = ctx.bind::<Decoded<AddRequest>>()?.into_inner();
            let response = AddResponse {
                sum: request.numbers.iter().sum(),
            };
            Ok::<_, RpcHandlerError>(bitcode::encode(&response))
        })
        .await
}

pub async fn add(
    client: &RpcClient,
    numbers: Vec<f64>,
    timeout: impl Into<RpcTimeout>,
) -> Result<f64, RpcClientError> {
    let request = AddRequest { numbers };
    let response: Decoded<AddResponse> = client
        .call(
            ADD_METHOD,
            &Encoded::<_, BitcodeCodec>::new(&request),
            timeout,
        )
        .await?;
    Ok(response.into_inner().sum)
}
