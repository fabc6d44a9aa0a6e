use mockall::mock;

use hartsim_core::soc::memory::remote::{RemoteLink, RemoteRequest, RemoteResponse};

mock! {
    pub Link {}
    impl RemoteLink for Link {
        fn send(&mut self, msg: RemoteRequest) -> bool;
        fn poll(&mut self) -> Option<RemoteResponse>;
    }
}
