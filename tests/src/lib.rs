mod mock_enb;

pub use mock_enb::MockEnb;
pub use mock_ue::MockUe;
