//! Ferry contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge contract.

use alloy::sol;

sol! {
    /// Ferry bridge contract deployed on each side of the route
    #[sol(rpc)]
    contract Ferry {
        /// Emitted on the source chain when a user locks or burns tokens
        event TransferInitiated(
            address indexed from,
            address indexed toOnOtherChain,
            uint256 amountIn,
            uint256 amountOut,
            uint256 feePaid,
            uint256 nonce
        );

        /// Complete a transfer on the destination chain.
        /// The contract deduplicates by `messageId`.
        function fulfill(address to, uint256 amount, bytes32 messageId) external payable;

        /// Native value that must be attached to `fulfill`
        function requiredNativeFee() external view returns (uint256);

        /// Whether `messageId` has already been fulfilled on this chain
        function isFulfilled(bytes32 messageId) external view returns (bool);
    }
}
