use crate::{
    agent::{Agent, AgentError, RequestContext},
    export::Principal,
    util,
};
use ic_certified_tree::Certificate;
use ic_request_types::{
    signed::SignedRequestStatus, ReplyResponse, RequestId, RequestStatusResponse,
};
use tracing::trace;

impl Agent {
    /// Polls the status of a call until it reaches a terminal state, waiting between polls as
    /// the agent's poll strategy says.
    ///
    /// With `signed_request_status`, that pre-signed request is sent on every poll instead of
    /// building and signing a new one.
    ///
    /// Returns the reply and the certificate it was read from. A rejected call is a
    /// [`CertifiedReject`](AgentError::CertifiedReject).
    pub async fn poll_for_response(
        &self,
        effective_canister_id: Principal,
        request_id: RequestId,
        signed_request_status: Option<SignedRequestStatus>,
    ) -> Result<(Vec<u8>, Certificate), AgentError> {
        let mut strategy = (self.poll_strategy)();
        loop {
            let (status, certificate) = match &signed_request_status {
                Some(signed) => self.request_status_signed(signed).await?,
                None => {
                    self.request_status_raw(&request_id, effective_canister_id)
                        .await?
                }
            };
            match status {
                RequestStatusResponse::Unknown
                | RequestStatusResponse::Received
                | RequestStatusResponse::Processing => {}
                RequestStatusResponse::Replied(ReplyResponse { arg }) => {
                    return Ok((arg, certificate))
                }
                RequestStatusResponse::Rejected(reject) => {
                    return Err(
                        AgentError::CertifiedReject(reject).with_context(RequestContext {
                            request_id: Some(request_id),
                            ..Default::default()
                        }),
                    )
                }
                RequestStatusResponse::Done => {
                    return Err(
                        AgentError::RequestStatusDoneNoReply(String::from(request_id))
                            .with_context(RequestContext {
                                request_id: Some(request_id),
                                ..Default::default()
                            }),
                    )
                }
            }
            let delay = strategy.next(&status)?;
            trace!(%request_id, ?status, ?delay, "call not completed yet");
            util::sleep(delay).await;
        }
    }

    /// Waits for the reply of a call.
    pub async fn wait(
        &self,
        request_id: &RequestId,
        effective_canister_id: Principal,
    ) -> Result<Vec<u8>, AgentError> {
        self.poll_for_response(effective_canister_id, *request_id, None)
            .await
            .map(|(reply, _)| reply)
    }

    /// Waits for the reply of a call, polling with a pre-signed status request.
    pub async fn wait_signed(
        &self,
        signed_request_status: SignedRequestStatus,
    ) -> Result<Vec<u8>, AgentError> {
        self.poll_for_response(
            signed_request_status.effective_canister_id,
            signed_request_status.request_id,
            Some(signed_request_status),
        )
        .await
        .map(|(reply, _)| reply)
    }
}
