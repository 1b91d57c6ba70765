//! Compound contract interfaces.
//!
//! Comet (Compound V3) is a single-base-asset market that liquidates by
//! absorbing an account. Compound V2 style cTokens liquidate per market pair.

use alloy::sol;

sol! {
    /// Compound V3 Comet market
    interface IComet {
        event Withdraw(address indexed src, address indexed to, uint256 amount);
        event AbsorbDebt(address indexed absorber, address indexed borrower, uint256 basePaidOut, uint256 usdValue);

        function borrowBalanceOf(address account) external view returns (uint256);
        function collateralBalanceOf(address account, address asset) external view returns (uint128);
        function absorb(address absorber, address[] calldata accounts) external;
    }
}

sol! {
    /// Compound V2 style cToken market
    interface ICToken {
        event Borrow(address borrower, uint256 borrowAmount, uint256 accountBorrows, uint256 totalBorrows);
        event LiquidateBorrow(address liquidator, address borrower, uint256 repayAmount, address cTokenCollateral, uint256 seizeTokens);

        /// (error, cTokenBalance, borrowBalance, exchangeRateMantissa)
        function getAccountSnapshot(address account) external view returns (uint256, uint256, uint256, uint256);
        function liquidateBorrow(address borrower, uint256 repayAmount, address cTokenCollateral) external returns (uint256);
    }
}
